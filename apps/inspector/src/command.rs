use std::str::FromStr;

use keyward_core::AppError;
use keyward_domain::PermissionAction;
use serde_json::Value;

const USAGE: &str = "usage: keyward-inspector <migrate | import | policies | global-access | \
field-map <action> | allowed-fields <action> <collection> | \
authorize <action> <collection> <field>... | validate <action> <collection> <key>...>";

/// One resolution run requested on the command line.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Migrate,
    Import,
    Policies,
    GlobalAccess,
    FieldMap {
        action: PermissionAction,
    },
    AllowedFields {
        action: PermissionAction,
        collection: String,
    },
    Authorize {
        action: PermissionAction,
        collection: String,
        fields: Vec<String>,
    },
    Validate {
        action: PermissionAction,
        collection: String,
        keys: Vec<Value>,
    },
}

impl Command {
    /// Parses the arguments following the program name.
    pub fn parse(arguments: &[String]) -> Result<Self, AppError> {
        let Some((name, rest)) = arguments.split_first() else {
            return Err(usage());
        };

        match (name.as_str(), rest) {
            ("migrate", []) => Ok(Self::Migrate),
            ("import", []) => Ok(Self::Import),
            ("policies", []) => Ok(Self::Policies),
            ("global-access", []) => Ok(Self::GlobalAccess),
            ("field-map", [action]) => Ok(Self::FieldMap {
                action: PermissionAction::from_str(action)?,
            }),
            ("allowed-fields", [action, collection]) => Ok(Self::AllowedFields {
                action: PermissionAction::from_str(action)?,
                collection: collection.clone(),
            }),
            ("authorize", [action, collection, fields @ ..]) if !fields.is_empty() => {
                Ok(Self::Authorize {
                    action: PermissionAction::from_str(action)?,
                    collection: collection.clone(),
                    fields: fields.to_vec(),
                })
            }
            ("validate", [action, collection, keys @ ..]) if !keys.is_empty() => {
                Ok(Self::Validate {
                    action: PermissionAction::from_str(action)?,
                    collection: collection.clone(),
                    keys: keys.iter().map(|key| parse_key(key)).collect(),
                })
            }
            _ => Err(usage()),
        }
    }
}

/// Keys are JSON when they parse as JSON, plain strings otherwise.
fn parse_key(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_owned()))
}

fn usage() -> AppError {
    AppError::Validation(USAGE.to_owned())
}

#[cfg(test)]
mod tests {
    use keyward_core::AppError;
    use keyward_domain::PermissionAction;
    use serde_json::json;

    use super::Command;

    fn arguments(values: &[&str]) -> Vec<String> {
        values.iter().map(|value| (*value).to_owned()).collect()
    }

    #[test]
    fn parses_commands_with_operands() {
        assert_eq!(
            Command::parse(&arguments(&["authorize", "read", "articles", "id", "author.name"])),
            Ok(Command::Authorize {
                action: PermissionAction::Read,
                collection: "articles".to_owned(),
                fields: vec!["id".to_owned(), "author.name".to_owned()],
            })
        );
        assert_eq!(
            Command::parse(&arguments(&["validate", "update", "articles", "7", "slug-a"])),
            Ok(Command::Validate {
                action: PermissionAction::Update,
                collection: "articles".to_owned(),
                keys: vec![json!(7), json!("slug-a")],
            })
        );
        assert_eq!(
            Command::parse(&arguments(&["global-access"])),
            Ok(Command::GlobalAccess)
        );
    }

    #[test]
    fn rejects_unknown_actions_and_missing_operands() {
        assert!(matches!(
            Command::parse(&arguments(&["field-map", "publish"])),
            Err(AppError::Validation(_))
        ));
        assert!(matches!(
            Command::parse(&arguments(&["authorize", "read", "articles"])),
            Err(AppError::Validation(_))
        ));
        assert!(matches!(Command::parse(&[]), Err(AppError::Validation(_))));
    }
}
