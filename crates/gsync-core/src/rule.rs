//! Rule grammar: `<source>:<org name>:<role>`.
//!
//! Dynamic rules carry a group email as `source`; static rules carry a user
//! email. Both share one grammar and one parser.

use std::fmt;

use crate::Role;

/// Maps a directory group to an org + role.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Rule {
    pub group: String,
    pub org_name: String,
    pub role: Role,
}

/// Maps one literal user identity to an org + role.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StaticRule {
    pub email: String,
    pub org_name: String,
    pub role: Role,
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.group, self.org_name, self.role)
    }
}

impl fmt::Display for StaticRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.email, self.org_name, self.role)
    }
}

/// Why a rule string was rejected.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MalformedRule {
    /// Not exactly three `:`-separated fields.
    FieldCount { rule: String, found: usize },
    /// One of the three fields is empty.
    EmptyField { rule: String, field: &'static str },
    /// Third field is not a known role name.
    UnknownRole { rule: String, role: String },
}

impl fmt::Display for MalformedRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MalformedRule::FieldCount { rule, found } => write!(
                f,
                "malformed rule '{rule}': expected <source>:<org name>:<role>, found {found} field(s)"
            ),
            MalformedRule::EmptyField { rule, field } => {
                write!(f, "malformed rule '{rule}': {field} is empty")
            }
            MalformedRule::UnknownRole { rule, role } => write!(
                f,
                "malformed rule '{rule}': unknown role '{role}' (expected Viewer | Editor | Admin)"
            ),
        }
    }
}

impl std::error::Error for MalformedRule {}

fn split_fields(text: &str) -> Result<(String, String, Role), MalformedRule> {
    let fields: Vec<&str> = text.split(':').map(str::trim).collect();
    let &[source, org_name, role] = fields.as_slice() else {
        return Err(MalformedRule::FieldCount {
            rule: text.to_string(),
            found: fields.len(),
        });
    };

    for (value, field) in [(source, "source"), (org_name, "org name"), (role, "role")] {
        if value.is_empty() {
            return Err(MalformedRule::EmptyField {
                rule: text.to_string(),
                field,
            });
        }
    }

    let role = role.parse::<Role>().map_err(|e| MalformedRule::UnknownRole {
        rule: text.to_string(),
        role: e.0,
    })?;

    Ok((source.to_string(), org_name.to_string(), role))
}

/// Parse a dynamic `group:org:role` rule.
pub fn parse_rule(text: &str) -> Result<Rule, MalformedRule> {
    let (group, org_name, role) = split_fields(text)?;
    Ok(Rule {
        group,
        org_name,
        role,
    })
}

/// Parse a static `email:org:role` rule.
pub fn parse_static_rule(text: &str) -> Result<StaticRule, MalformedRule> {
    let (email, org_name, role) = split_fields(text)?;
    Ok(StaticRule {
        email,
        org_name,
        role,
    })
}
