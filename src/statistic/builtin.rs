use strum_macros::{AsRefStr, EnumIter};

use super::StatisticType;

/// Statistics every deployment tracks out of the box.
///
/// The `Local*` variants only live for the duration of a match and are never
/// written to storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum BuiltinStatistic {
    Kills,
    Deaths,
    GamesPlayed,
    HighestWave,
    Level,
    Xp,
    Orbs,
    LocalKills,
    LocalOrbs,
    LocalWave,
}

impl BuiltinStatistic {
    pub fn is_persistent(self) -> bool {
        !matches!(
            self,
            BuiltinStatistic::LocalKills | BuiltinStatistic::LocalOrbs | BuiltinStatistic::LocalWave
        )
    }

    pub fn display_name(self) -> &'static str {
        match self {
            BuiltinStatistic::Kills => "Kills",
            BuiltinStatistic::Deaths => "Deaths",
            BuiltinStatistic::GamesPlayed => "Games Played",
            BuiltinStatistic::HighestWave => "Highest Wave",
            BuiltinStatistic::Level => "Level",
            BuiltinStatistic::Xp => "Experience",
            BuiltinStatistic::Orbs => "Orbs",
            BuiltinStatistic::LocalKills => "Kills (this game)",
            BuiltinStatistic::LocalOrbs => "Orbs (this game)",
            BuiltinStatistic::LocalWave => "Wave (this game)",
        }
    }

    pub fn statistic_type(self) -> StatisticType {
        let base = if self.is_persistent() {
            StatisticType::persistent(self.as_ref())
        } else {
            StatisticType::local(self.as_ref(), 0)
        };
        base.with_display_name(self.display_name())
    }
}
