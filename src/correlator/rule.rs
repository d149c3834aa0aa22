//! Rule definition and CRUD contract (§4.5, §6 "Rule CRUD contract").

use uuid::Uuid;

use crate::cel::{parse, Node};
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreateOn {
    Any,
    All,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolveOn {
    Never,
    All,
    First,
    Last,
}

/// CRUD-only unit used to normalize `timeframe` to seconds (§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeUnit {
    Seconds,
    Minutes,
    Hours,
    Days,
}

impl TimeUnit {
    fn to_seconds(self, value: u64) -> u64 {
        let factor = match self {
            TimeUnit::Seconds => 1,
            TimeUnit::Minutes => 60,
            TimeUnit::Hours => 3_600,
            TimeUnit::Days => 86_400,
        };
        value * factor
    }
}

/// A correlation rule (§4.5). `timeframe_secs` is always stored already
/// normalized; `Rule::from_crud` performs the `timeunit` conversion
/// named in the CRUD contract (§6).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Rule {
    pub id: Uuid,
    pub name: String,
    pub definition_cel: String,
    pub timeframe_secs: u64,
    pub create_on: CreateOn,
    pub threshold: u32,
    pub resolve_on: ResolveOn,
    pub require_approve: bool,
    pub grouping_criteria: Vec<String>,
    pub incident_prefix: Option<String>,
    pub incident_name_template: Option<String>,
    pub assignee: Option<String>,
    pub created_by: Option<String>,
}

impl Rule {
    /// Builds a `Rule` from the external CRUD contract fields (§6),
    /// normalizing `timeframe`/`timeunit` into `timeframe_secs`.
    #[allow(clippy::too_many_arguments)]
    pub fn from_crud(
        id: Uuid,
        name: String,
        definition_cel: String,
        timeframe: u64,
        timeunit: TimeUnit,
        create_on: CreateOn,
        threshold: u32,
        resolve_on: ResolveOn,
        require_approve: bool,
        grouping_criteria: Vec<String>,
        incident_prefix: Option<String>,
        incident_name_template: Option<String>,
        assignee: Option<String>,
        created_by: Option<String>,
    ) -> Self {
        Rule {
            id,
            name,
            definition_cel,
            timeframe_secs: timeunit.to_seconds(timeframe),
            create_on,
            threshold: threshold.max(1),
            resolve_on,
            require_approve,
            grouping_criteria,
            incident_prefix,
            incident_name_template,
            assignee,
            created_by,
        }
    }

    /// Parses `definition_cel` into its AST. Rules are small and this
    /// is not on a hot loop shared across many alerts, so the AST is
    /// reparsed rather than cached (§5 "CEL parsing ... pure functions").
    pub fn parsed(&self) -> Result<Node> {
        parse(&self.definition_cel)
    }
}
