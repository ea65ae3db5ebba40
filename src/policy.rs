//! Default review policy seeded on first run.
//!
//! The default rule set covers common DDL and DML conventions. The default
//! template bundles every default rule; operators copy and customize it rather
//! than editing the seed, and seeding never touches an existing rule or template.

use serde::{Deserialize, Serialize};

/// Name of the template created by seeding.
pub const DEFAULT_TEMPLATE_NAME: &str = "default";

/// Severity reported when a rule matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleLevel {
    Normal,
    Notice,
    Warn,
    Error,
}

impl RuleLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleLevel::Normal => "normal",
            RuleLevel::Notice => "notice",
            RuleLevel::Warn => "warn",
            RuleLevel::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "normal" => Some(RuleLevel::Normal),
            "notice" => Some(RuleLevel::Notice),
            "warn" => Some(RuleLevel::Warn),
            "error" => Some(RuleLevel::Error),
            _ => None,
        }
    }
}

impl std::fmt::Display for RuleLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A review rule as stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    pub name: String,
    pub description: String,
    pub level: RuleLevel,
    pub category: String,
    /// Rule threshold, empty when the rule takes none.
    pub value: String,
}

/// A named bundle of rules.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleTemplate {
    pub name: String,
    pub description: String,
    pub rule_names: Vec<String>,
}

struct RuleSeed {
    name: &'static str,
    description: &'static str,
    level: RuleLevel,
    category: &'static str,
    value: &'static str,
}

const DDL_CONVENTION: &str = "DDL convention";
const DML_CONVENTION: &str = "DML convention";
const INDEX_OPTIMIZATION: &str = "index optimization";

const DEFAULT_RULE_SEEDS: &[RuleSeed] = &[
    RuleSeed {
        name: "ddl_check_table_without_if_not_exists",
        description: "create table must use IF NOT EXISTS",
        level: RuleLevel::Error,
        category: DDL_CONVENTION,
        value: "",
    },
    RuleSeed {
        name: "ddl_check_object_name_length",
        description: "table, column and index names must not exceed the length limit",
        level: RuleLevel::Error,
        category: DDL_CONVENTION,
        value: "64",
    },
    RuleSeed {
        name: "ddl_check_pk_not_exist",
        description: "table must have a primary key",
        level: RuleLevel::Error,
        category: DDL_CONVENTION,
        value: "",
    },
    RuleSeed {
        name: "ddl_check_pk_without_auto_increment",
        description: "primary key should be auto increment",
        level: RuleLevel::Error,
        category: DDL_CONVENTION,
        value: "",
    },
    RuleSeed {
        name: "ddl_check_column_without_comment",
        description: "column should have a comment",
        level: RuleLevel::Notice,
        category: DDL_CONVENTION,
        value: "",
    },
    RuleSeed {
        name: "ddl_check_table_without_comment",
        description: "table should have a comment",
        level: RuleLevel::Notice,
        category: DDL_CONVENTION,
        value: "",
    },
    RuleSeed {
        name: "ddl_disable_fk",
        description: "foreign keys are not allowed",
        level: RuleLevel::Error,
        category: DDL_CONVENTION,
        value: "",
    },
    RuleSeed {
        name: "ddl_check_index_count",
        description: "number of indexes per table should not exceed the limit",
        level: RuleLevel::Notice,
        category: INDEX_OPTIMIZATION,
        value: "5",
    },
    RuleSeed {
        name: "ddl_check_composite_index_max",
        description: "number of columns in a composite index should not exceed the limit",
        level: RuleLevel::Notice,
        category: INDEX_OPTIMIZATION,
        value: "3",
    },
    RuleSeed {
        name: "dml_check_where_is_invalid",
        description: "update and delete must have a meaningful WHERE clause",
        level: RuleLevel::Error,
        category: DML_CONVENTION,
        value: "",
    },
    RuleSeed {
        name: "dml_disable_select_all_column",
        description: "SELECT * is not recommended",
        level: RuleLevel::Notice,
        category: DML_CONVENTION,
        value: "",
    },
    RuleSeed {
        name: "dml_check_insert_columns_exist",
        description: "INSERT should list its target columns",
        level: RuleLevel::Notice,
        category: DML_CONVENTION,
        value: "",
    },
    RuleSeed {
        name: "dml_check_batch_insert_lists_max",
        description: "number of rows in a batch INSERT should not exceed the limit",
        level: RuleLevel::Notice,
        category: DML_CONVENTION,
        value: "5000",
    },
];

/// The rule set seeded on first run.
pub fn default_rules() -> Vec<Rule> {
    DEFAULT_RULE_SEEDS
        .iter()
        .map(|seed| Rule {
            name: seed.name.to_string(),
            description: seed.description.to_string(),
            level: seed.level,
            category: seed.category.to_string(),
            value: seed.value.to_string(),
        })
        .collect()
}

/// The template seeded on first run, containing every rule in `rules`.
pub fn default_template(rules: &[Rule]) -> RuleTemplate {
    RuleTemplate {
        name: DEFAULT_TEMPLATE_NAME.to_string(),
        description: "default rule template".to_string(),
        rule_names: rules.iter().map(|r| r.name.clone()).collect(),
    }
}

/// Rules and template applied by the seeding step.
#[derive(Debug, Clone)]
pub struct DefaultPolicySet {
    pub rules: Vec<Rule>,
    pub template: RuleTemplate,
}

impl Default for DefaultPolicySet {
    fn default() -> Self {
        let rules = default_rules();
        let template = default_template(&rules);
        Self { rules, template }
    }
}
