// Statement text for the SQL backend.
//
// Every value is a bound parameter; the only interpolated text is the table
// name and statistic column names, which are validated identifiers.

use crate::statistic::{is_valid_identifier, StatisticRegistry, StatisticType};

use super::StorageError;

pub const UUID_COLUMN: &str = "uuid";
pub const NAME_COLUMN: &str = "name";
pub const NAME_MAX_LEN: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Postgres,
    MySql,
    Sqlite,
}

impl Dialect {
    pub fn from_url(url: &str) -> Option<Self> {
        let scheme = url.split(':').next()?.to_ascii_lowercase();
        match scheme.as_str() {
            "postgres" | "postgresql" => Some(Dialect::Postgres),
            "mysql" | "mariadb" => Some(Dialect::MySql),
            "sqlite" => Some(Dialect::Sqlite),
            _ => None,
        }
    }

    pub fn quote(&self, identifier: &str) -> String {
        match self {
            Dialect::MySql => format!("`{identifier}`"),
            Dialect::Postgres | Dialect::Sqlite => format!("\"{identifier}\""),
        }
    }

    /// Placeholder for the 1-based parameter `index`.
    pub fn placeholder(&self, index: usize) -> String {
        match self {
            Dialect::MySql => "?".to_string(),
            Dialect::Postgres | Dialect::Sqlite => format!("${index}"),
        }
    }
}

/// An additive schema step that is allowed to find its column already there.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Migration {
    pub column: String,
    pub sql: String,
}

/// Builds statements for one table and one statistic set.
#[derive(Debug, Clone)]
pub struct QueryBuilder {
    dialect: Dialect,
    table: String,
    columns: Vec<String>,
}

impl QueryBuilder {
    pub fn new(
        dialect: Dialect,
        table: &str,
        registry: &StatisticRegistry,
    ) -> Result<Self, StorageError> {
        if !is_valid_identifier(table) {
            return Err(StorageError::SchemaFailure(format!(
                "invalid table name '{table}'"
            )));
        }

        Ok(Self {
            dialect,
            table: table.to_string(),
            columns: registry
                .persistent()
                .map(|s| s.name().to_string())
                .collect(),
        })
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Persistent statistic columns in registry order.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn has_column(&self, statistic: &StatisticType) -> bool {
        statistic.is_persistent() && self.columns.iter().any(|c| c == statistic.name())
    }

    pub fn create_table(&self) -> String {
        let mut definitions = vec![
            format!(
                "{} VARCHAR(36) NOT NULL PRIMARY KEY",
                self.q(UUID_COLUMN)
            ),
            self.name_definition(),
        ];
        definitions.extend(self.columns.iter().map(|c| self.statistic_definition(c)));

        format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            self.q(&self.table),
            definitions.join(", ")
        )
    }

    /// Column additions for tables created by older versions: the display
    /// name first, then every persistent statistic.
    pub fn migrations(&self) -> Vec<Migration> {
        let mut migrations = vec![Migration {
            column: NAME_COLUMN.to_string(),
            sql: self.add_column(&self.name_definition()),
        }];
        migrations.extend(self.columns.iter().map(|column| Migration {
            column: column.clone(),
            sql: self.add_column(&self.statistic_definition(column)),
        }));
        migrations
    }

    /// Binds: name, uuid.
    pub fn update_name(&self) -> String {
        format!(
            "UPDATE {} SET {} = {} WHERE {} = {}",
            self.q(&self.table),
            self.q(NAME_COLUMN),
            self.p(1),
            self.q(UUID_COLUMN),
            self.p(2)
        )
    }

    /// Binds: uuid. Selects the name followed by every statistic column.
    pub fn select_user(&self) -> String {
        let mut selected = vec![self.q(NAME_COLUMN)];
        selected.extend(self.columns.iter().map(|c| self.q(c)));

        format!(
            "SELECT {} FROM {} WHERE {} = {}",
            selected.join(", "),
            self.q(&self.table),
            self.q(UUID_COLUMN),
            self.p(1)
        )
    }

    /// Binds: uuid, name. Does nothing if the row already exists.
    pub fn insert_user(&self) -> String {
        let columns = format!("{}, {}", self.q(UUID_COLUMN), self.q(NAME_COLUMN));
        match self.dialect {
            Dialect::MySql => format!(
                "INSERT IGNORE INTO {} ({}) VALUES ({}, {})",
                self.q(&self.table),
                columns,
                self.p(1),
                self.p(2)
            ),
            Dialect::Postgres | Dialect::Sqlite => format!(
                "INSERT INTO {} ({}) VALUES ({}, {}) ON CONFLICT ({}) DO NOTHING",
                self.q(&self.table),
                columns,
                self.p(1),
                self.p(2),
                self.q(UUID_COLUMN)
            ),
        }
    }

    /// Binds: value, uuid. `None` for statistics without a column.
    pub fn update_statistic(&self, statistic: &StatisticType) -> Option<String> {
        if !self.has_column(statistic) {
            return None;
        }

        Some(format!(
            "UPDATE {} SET {} = {} WHERE {} = {}",
            self.q(&self.table),
            self.q(statistic.name()),
            self.p(1),
            self.q(UUID_COLUMN),
            self.p(2)
        ))
    }

    /// Binds: one value per [`columns`](Self::columns) in order, then uuid.
    /// `None` when there are no persistent statistics.
    pub fn update_all(&self) -> Option<String> {
        if self.columns.is_empty() {
            return None;
        }

        let assignments: Vec<String> = self
            .columns
            .iter()
            .enumerate()
            .map(|(i, c)| format!("{} = {}", self.q(c), self.p(i + 1)))
            .collect();

        Some(format!(
            "UPDATE {} SET {} WHERE {} = {}",
            self.q(&self.table),
            assignments.join(", "),
            self.q(UUID_COLUMN),
            self.p(self.columns.len() + 1)
        ))
    }

    /// No binds. Whole column, ascending, uuid as tie-breaker.
    pub fn select_column(&self, statistic: &StatisticType) -> Option<String> {
        if !self.has_column(statistic) {
            return None;
        }

        let column = self.q(statistic.name());
        Some(format!(
            "SELECT {}, {} FROM {} ORDER BY {} ASC, {} ASC",
            self.q(UUID_COLUMN),
            column,
            self.q(&self.table),
            column,
            self.q(UUID_COLUMN)
        ))
    }

    /// Binds: uuid.
    pub fn select_name(&self) -> String {
        format!(
            "SELECT {} FROM {} WHERE {} = {}",
            self.q(NAME_COLUMN),
            self.q(&self.table),
            self.q(UUID_COLUMN),
            self.p(1)
        )
    }

    fn name_definition(&self) -> String {
        format!(
            "{} VARCHAR({NAME_MAX_LEN}) NOT NULL DEFAULT ''",
            self.q(NAME_COLUMN)
        )
    }

    fn statistic_definition(&self, column: &str) -> String {
        format!("{} INTEGER NOT NULL DEFAULT 0", self.q(column))
    }

    fn add_column(&self, definition: &str) -> String {
        format!("ALTER TABLE {} ADD COLUMN {}", self.q(&self.table), definition)
    }

    fn q(&self, identifier: &str) -> String {
        self.dialect.quote(identifier)
    }

    fn p(&self, index: usize) -> String {
        self.dialect.placeholder(index)
    }
}

/// Truncates a display name to the width of the name column.
pub fn fit_name(name: &str) -> String {
    name.chars().take(NAME_MAX_LEN).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn registry() -> StatisticRegistry {
        StatisticRegistry::builder()
            .register(StatisticType::persistent("kills"))
            .unwrap()
            .register(StatisticType::local("local_kills", 0))
            .unwrap()
            .register(StatisticType::persistent("deaths"))
            .unwrap()
            .build()
    }

    fn builder(dialect: Dialect) -> QueryBuilder {
        QueryBuilder::new(dialect, "playerstats", &registry()).unwrap()
    }

    #[rstest]
    #[case("postgres://user:pw@localhost/db", Some(Dialect::Postgres))]
    #[case("postgresql://localhost/db", Some(Dialect::Postgres))]
    #[case("mysql://root@127.0.0.1:3306/mc", Some(Dialect::MySql))]
    #[case("mariadb://localhost/mc", Some(Dialect::MySql))]
    #[case("sqlite://stats.db?mode=rwc", Some(Dialect::Sqlite))]
    #[case("sqlite::memory:", Some(Dialect::Sqlite))]
    #[case("redis://localhost", None)]
    fn test_dialect_from_url(#[case] url: &str, #[case] expected: Option<Dialect>) {
        assert_eq!(Dialect::from_url(url), expected);
    }

    #[test]
    fn test_rejects_invalid_table_name() {
        let result = QueryBuilder::new(Dialect::Postgres, "stats; DROP", &registry());
        assert!(matches!(result, Err(StorageError::SchemaFailure(_))));
    }

    #[test]
    fn test_create_table_postgres() {
        assert_eq!(
            builder(Dialect::Postgres).create_table(),
            "CREATE TABLE IF NOT EXISTS \"playerstats\" (\
             \"uuid\" VARCHAR(36) NOT NULL PRIMARY KEY, \
             \"name\" VARCHAR(32) NOT NULL DEFAULT '', \
             \"kills\" INTEGER NOT NULL DEFAULT 0, \
             \"deaths\" INTEGER NOT NULL DEFAULT 0)"
        );
    }

    #[test]
    fn test_create_table_mysql_uses_backticks() {
        let sql = builder(Dialect::MySql).create_table();
        assert!(sql.starts_with("CREATE TABLE IF NOT EXISTS `playerstats` (`uuid`"));
        assert!(!sql.contains("local_kills"));
    }

    #[test]
    fn test_migrations_cover_name_and_every_statistic() {
        let migrations = builder(Dialect::Sqlite).migrations();
        let columns: Vec<&str> = migrations.iter().map(|m| m.column.as_str()).collect();

        assert_eq!(columns, vec!["name", "kills", "deaths"]);
        assert_eq!(
            migrations[1].sql,
            "ALTER TABLE \"playerstats\" ADD COLUMN \"kills\" INTEGER NOT NULL DEFAULT 0"
        );
    }

    #[rstest]
    #[case(
        Dialect::Postgres,
        "UPDATE \"playerstats\" SET \"kills\" = $1, \"deaths\" = $2 WHERE \"uuid\" = $3"
    )]
    #[case(
        Dialect::MySql,
        "UPDATE `playerstats` SET `kills` = ?, `deaths` = ? WHERE `uuid` = ?"
    )]
    fn test_update_all_is_single_statement(#[case] dialect: Dialect, #[case] expected: &str) {
        assert_eq!(builder(dialect).update_all().unwrap(), expected);
    }

    #[test]
    fn test_update_statistic_skips_local_and_unknown() {
        let builder = builder(Dialect::Postgres);

        assert_eq!(
            builder
                .update_statistic(&StatisticType::persistent("kills"))
                .unwrap(),
            "UPDATE \"playerstats\" SET \"kills\" = $1 WHERE \"uuid\" = $2"
        );
        assert!(builder
            .update_statistic(&StatisticType::local("local_kills", 0))
            .is_none());
        assert!(builder
            .update_statistic(&StatisticType::persistent("unregistered"))
            .is_none());
    }

    #[test]
    fn test_insert_user_tolerates_existing_rows() {
        assert_eq!(
            builder(Dialect::Sqlite).insert_user(),
            "INSERT INTO \"playerstats\" (\"uuid\", \"name\") VALUES ($1, $2) \
             ON CONFLICT (\"uuid\") DO NOTHING"
        );
        assert_eq!(
            builder(Dialect::MySql).insert_user(),
            "INSERT IGNORE INTO `playerstats` (`uuid`, `name`) VALUES (?, ?)"
        );
    }

    #[test]
    fn test_select_column_orders_ascending() {
        assert_eq!(
            builder(Dialect::Postgres)
                .select_column(&StatisticType::persistent("deaths"))
                .unwrap(),
            "SELECT \"uuid\", \"deaths\" FROM \"playerstats\" \
             ORDER BY \"deaths\" ASC, \"uuid\" ASC"
        );
    }

    #[test]
    fn test_select_user_lists_name_then_statistics() {
        assert_eq!(
            builder(Dialect::MySql).select_user(),
            "SELECT `name`, `kills`, `deaths` FROM `playerstats` WHERE `uuid` = ?"
        );
    }

    #[test]
    fn test_no_persistent_statistics() {
        let registry = StatisticRegistry::builder()
            .register(StatisticType::local("combo", 0))
            .unwrap()
            .build();
        let builder = QueryBuilder::new(Dialect::Postgres, "playerstats", &registry).unwrap();

        assert!(builder.update_all().is_none());
        assert_eq!(builder.migrations().len(), 1);
    }

    #[test]
    fn test_fit_name_truncates_on_char_boundary() {
        let long = "é".repeat(40);
        assert_eq!(fit_name(&long).chars().count(), NAME_MAX_LEN);
        assert_eq!(fit_name("Steve"), "Steve");
    }
}
