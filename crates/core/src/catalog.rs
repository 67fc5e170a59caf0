//! Per-dialect catalog queries and the rules that shape their rows.
//!
//! Every dialect is described by one [`DialectCatalog`] value. Slots only ever ask a
//! dialect for its catalog, so supporting another backend means adding a variant and a
//! table entry.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::driver::QueryRow;

pub const QUERY_EDITOR_ENTRY: &str = "<sql>";
pub const PREVIEW_ROW_LIMIT: usize = 200;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum Dialect {
    #[default]
    Postgres,
    Mysql,
    #[serde(alias = "mssql")]
    SqlServer,
}

impl Dialect {
    pub const ALL: [Dialect; 3] = [Dialect::Postgres, Dialect::Mysql, Dialect::SqlServer];

    #[must_use]
    pub fn catalog(self) -> &'static DialectCatalog {
        match self {
            Self::Postgres => &POSTGRES,
            Self::Mysql => &MYSQL,
            Self::SqlServer => &SQL_SERVER,
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.catalog().label)
    }
}

/// How the rows of a database listing are filtered and ordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseRule {
    ExcludeTemplates,
    SystemLast(&'static [&'static str]),
    ExcludeSystem(&'static [&'static str]),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowLimit {
    Limit,
    Top,
}

#[derive(Debug)]
pub struct DialectCatalog {
    pub dialect: Dialect,
    pub label: &'static str,
    pub default_port: u16,
    pub list_databases: &'static str,
    pub database_rule: DatabaseRule,
    pub list_objects: &'static str,
    pub internal_schemas: &'static [&'static str],
    pub quotes: (char, char),
    pub row_limit: RowLimit,
}

static POSTGRES: DialectCatalog = DialectCatalog {
    dialect: Dialect::Postgres,
    label: "postgres",
    default_port: 5432,
    list_databases: "select datname::text, datistemplate::text from pg_database \
                     order by datname asc",
    database_rule: DatabaseRule::ExcludeTemplates,
    list_objects: "select table_schema::text, table_name::text, table_type::text \
                   from information_schema.tables",
    internal_schemas: &["pg_catalog", "information_schema"],
    quotes: ('"', '"'),
    row_limit: RowLimit::Limit,
};

static MYSQL: DialectCatalog = DialectCatalog {
    dialect: Dialect::Mysql,
    label: "mysql",
    default_port: 3306,
    list_databases: "select schema_name from information_schema.schemata \
                     order by schema_name asc",
    database_rule: DatabaseRule::SystemLast(&[
        "information_schema",
        "performance_schema",
        "sys",
        "mysql",
    ]),
    list_objects: "select table_schema, table_name, table_type from information_schema.tables \
                   where table_schema = database()",
    internal_schemas: &["information_schema", "performance_schema", "sys", "mysql"],
    quotes: ('`', '`'),
    row_limit: RowLimit::Limit,
};

static SQL_SERVER: DialectCatalog = DialectCatalog {
    dialect: Dialect::SqlServer,
    label: "sqlserver",
    default_port: 1433,
    list_databases: "select name from master.dbo.sysdatabases order by name asc",
    database_rule: DatabaseRule::ExcludeSystem(&["master", "tempdb", "model", "msdb"]),
    list_objects: "select table_schema, table_name, table_type from information_schema.tables",
    internal_schemas: &["INFORMATION_SCHEMA", "sys"],
    quotes: ('[', ']'),
    row_limit: RowLimit::Top,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Database,
    Table,
    View,
    SyntheticQueryEditor,
}

impl EntryKind {
    #[must_use]
    pub fn marker(self) -> &'static str {
        match self {
            Self::Database => "D",
            Self::Table => "T",
            Self::View => "V",
            Self::SyntheticQueryEditor => "",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    pub name: String,
    pub kind: EntryKind,
}

impl CatalogEntry {
    #[must_use]
    pub fn new(name: impl Into<String>, kind: EntryKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }

    #[must_use]
    pub fn query_editor() -> Self {
        Self::new(QUERY_EDITOR_ENTRY, EntryKind::SyntheticQueryEditor)
    }
}

impl DialectCatalog {
    #[must_use]
    pub fn shape_databases(&self, rows: &[QueryRow]) -> Vec<CatalogEntry> {
        let mut names = rows
            .iter()
            .filter_map(|row| {
                let name = row.value(0)?;
                let keep = match self.database_rule {
                    DatabaseRule::ExcludeTemplates => !row.value(1).is_some_and(is_truthy),
                    DatabaseRule::ExcludeSystem(system) => !system.contains(&name),
                    DatabaseRule::SystemLast(_) => true,
                };
                keep.then(|| name.to_string())
            })
            .collect::<Vec<_>>();

        match self.database_rule {
            DatabaseRule::SystemLast(system) => names.sort_by(|left, right| {
                system
                    .contains(&left.as_str())
                    .cmp(&system.contains(&right.as_str()))
                    .then_with(|| left.cmp(right))
            }),
            DatabaseRule::ExcludeTemplates | DatabaseRule::ExcludeSystem(_) => names.sort(),
        }

        names
            .into_iter()
            .map(|name| CatalogEntry::new(name, EntryKind::Database))
            .collect()
    }

    /// Tables and views of one database, user schemas first, led by the query editor row.
    #[must_use]
    pub fn shape_objects(&self, rows: &[QueryRow]) -> Vec<CatalogEntry> {
        let mut objects = rows
            .iter()
            .filter_map(|row| {
                let schema = row.value(0)?;
                let name = row.value(1)?;
                let is_view = row
                    .value(2)
                    .is_some_and(|kind| kind.to_ascii_uppercase().ends_with("VIEW"));
                let internal = self.internal_schemas.contains(&schema);
                Some((internal, format!("{schema}.{name}"), is_view))
            })
            .collect::<Vec<_>>();
        objects.sort_unstable_by(|left, right| {
            left.0.cmp(&right.0).then_with(|| left.1.cmp(&right.1))
        });

        let mut entries = Vec::with_capacity(objects.len() + 1);
        entries.push(CatalogEntry::query_editor());
        entries.extend(objects.into_iter().map(|(_, name, is_view)| {
            CatalogEntry::new(
                name,
                if is_view {
                    EntryKind::View
                } else {
                    EntryKind::Table
                },
            )
        }));
        entries
    }

    #[must_use]
    pub fn quote_identifier(&self, identifier: &str) -> String {
        let (open, close) = self.quotes;
        let escaped = identifier.replace(close, &format!("{close}{close}"));
        format!("{open}{escaped}{close}")
    }

    #[must_use]
    pub fn preview_sql(&self, qualified_name: &str, limit: usize) -> String {
        let target = match qualified_name.split_once('.') {
            Some((schema, name)) => format!(
                "{}.{}",
                self.quote_identifier(schema),
                self.quote_identifier(name)
            ),
            None => self.quote_identifier(qualified_name),
        };
        match self.row_limit {
            RowLimit::Limit => format!("select * from {target} limit {limit}"),
            RowLimit::Top => format!("select top ({limit}) * from {target}"),
        }
    }
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "t" | "true" | "1" | "yes"
    )
}

#[cfg(test)]
mod tests {
    use super::{CatalogEntry, Dialect, EntryKind};
    use crate::driver::QueryRow;

    fn rows(values: &[&[&str]]) -> Vec<QueryRow> {
        values
            .iter()
            .map(|row| QueryRow::new(row.iter().map(|value| (*value).to_string()).collect()))
            .collect()
    }

    fn names(entries: &[CatalogEntry]) -> Vec<&str> {
        entries.iter().map(|entry| entry.name.as_str()).collect()
    }

    #[test]
    fn postgres_listing_drops_templates_and_sorts_by_name() {
        let catalog = Dialect::Postgres.catalog();
        let shaped = catalog.shape_databases(&rows(&[
            &["zz", "false"],
            &["aa", "f"],
            &["template0", "true"],
        ]));
        assert_eq!(names(&shaped), vec!["aa", "zz"]);
        assert!(shaped.iter().all(|entry| entry.kind == EntryKind::Database));
    }

    #[test]
    fn mysql_listing_sorts_system_schemas_last() {
        let catalog = Dialect::Mysql.catalog();
        let shaped = catalog.shape_databases(&rows(&[
            &["public"],
            &["information_schema"],
            &["custom"],
        ]));
        assert_eq!(names(&shaped), vec!["custom", "public", "information_schema"]);
    }

    #[test]
    fn sqlserver_listing_excludes_system_databases() {
        let catalog = Dialect::SqlServer.catalog();
        let shaped = catalog.shape_databases(&rows(&[
            &["tempdb"],
            &["sales"],
            &["master"],
            &["analytics"],
            &["msdb"],
            &["model"],
        ]));
        assert_eq!(names(&shaped), vec!["analytics", "sales"]);
    }

    #[test]
    fn objects_lead_with_query_editor_and_push_internal_schemas_last() {
        let catalog = Dialect::Postgres.catalog();
        let shaped = catalog.shape_objects(&rows(&[
            &["pg_catalog", "pg_class", "BASE TABLE"],
            &["public", "users", "BASE TABLE"],
            &["information_schema", "tables", "VIEW"],
            &["audit", "events", "BASE TABLE"],
            &["public", "active_users", "VIEW"],
        ]));

        assert_eq!(shaped[0], CatalogEntry::query_editor());
        assert_eq!(
            names(&shaped[1..]),
            vec![
                "audit.events",
                "public.active_users",
                "public.users",
                "information_schema.tables",
                "pg_catalog.pg_class",
            ]
        );
        assert_eq!(shaped[2].kind, EntryKind::View);
        assert_eq!(shaped[3].kind, EntryKind::Table);
    }

    #[test]
    fn empty_database_still_offers_query_editor() {
        let shaped = Dialect::SqlServer.catalog().shape_objects(&[]);
        assert_eq!(shaped, vec![CatalogEntry::query_editor()]);
    }

    #[test]
    fn preview_sql_uses_dialect_quoting_and_row_limit() {
        assert_eq!(
            Dialect::Postgres.catalog().preview_sql("public.users", 200),
            r#"select * from "public"."users" limit 200"#
        );
        assert_eq!(
            Dialect::Mysql.catalog().preview_sql("app.odd`name", 50),
            "select * from `app`.`odd``name` limit 50"
        );
        assert_eq!(
            Dialect::SqlServer.catalog().preview_sql("dbo.orders", 200),
            "select top (200) * from [dbo].[orders]"
        );
    }

    #[test]
    fn every_dialect_has_a_catalog() {
        for dialect in Dialect::ALL {
            let catalog = dialect.catalog();
            assert_eq!(catalog.dialect, dialect);
            assert!(!catalog.list_databases.is_empty());
            assert!(!catalog.list_objects.is_empty());
        }
    }
}
