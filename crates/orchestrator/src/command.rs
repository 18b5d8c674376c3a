//! Typed request bodies and reply results, one shape per event type.
//!
//! The orchestrator keeps the untyped saga data as a JSON object
//! ([`SagaContext`]) and converts it at the transport boundary: a
//! [`Command`] is built from the context right before dispatch and an
//! [`EventResult`] is decoded from the reply body right after it arrives.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::catalog::EventType;
use crate::error::{Result, SagaError};

/// Payload accumulated for a saga: operation input, inherited ancestor
/// results and the results of its own completed events.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SagaContext(Map<String, Value>);

impl SagaContext {
    /// Wraps a JSON object. Anything else yields an empty context.
    pub fn from_value(value: &Value) -> Self {
        match value {
            Value::Object(map) => Self(map.clone()),
            _ => Self::default(),
        }
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field).filter(|v| !v.is_null())
    }

    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(field.into(), value.into());
    }

    /// Reads a field as text. Numbers are rendered in decimal.
    pub fn str_field(&self, field: &str) -> Option<String> {
        match self.get(field)? {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    /// Reads a field as an integer. Numeric strings are accepted.
    pub fn i64_field(&self, field: &str) -> Option<i64> {
        match self.get(field)? {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Reads a field as a list of strings.
    pub fn str_list(&self, field: &str) -> Option<Vec<String>> {
        let items = self.get(field)?.as_array()?;
        items
            .iter()
            .map(|item| match item {
                Value::String(s) => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .collect()
    }

    pub fn merge_result(&mut self, result: &EventResult) {
        result.merge_into(self);
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

/// Request body sent to a downstream service.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Command {
    CreateUser {
        login: String,
        password: String,
        email: String,
    },
    CheckPassword {
        login: String,
        password: String,
    },
    User {
        user_id: String,
    },
    UserAccount {
        user_id: String,
        account_id: String,
    },
    ReserveAccount {
        user_id: String,
        currency: String,
    },
    CreateAccount {
        account_id: String,
        user_id: String,
        currency: String,
    },
    Account {
        account_id: String,
    },
    AccountCache {
        account_id: String,
        amount: i64,
    },
}

impl Command {
    /// Builds the request body for `event_type` from the saga context.
    ///
    /// Fails with [`SagaError::InvalidOperationsData`] naming the first
    /// missing field.
    pub fn build(event_type: EventType, ctx: &SagaContext) -> Result<Self> {
        let text = |field: &str| {
            ctx.str_field(field)
                .ok_or_else(|| missing(event_type, field))
        };

        let command = match event_type {
            EventType::CreateUser => Command::CreateUser {
                login: text("login")?,
                password: text("password")?,
                email: text("email")?,
            },
            EventType::CheckPassword => Command::CheckPassword {
                login: text("login")?,
                password: text("password")?,
            },
            EventType::DeleteUser | EventType::CheckUser | EventType::GetUserData => {
                Command::User {
                    user_id: text("user_id")?,
                }
            }
            EventType::AddAccountToUser
            | EventType::RemoveAccountFromUser
            | EventType::NotifyAccountCreated => Command::UserAccount {
                user_id: text("user_id")?,
                account_id: text("account_id")?,
            },
            EventType::ReserveAccount => Command::ReserveAccount {
                user_id: text("user_id")?,
                currency: text("currency")?,
            },
            EventType::CreateAccount => Command::CreateAccount {
                account_id: text("account_id")?,
                user_id: text("user_id")?,
                currency: text("currency")?,
            },
            EventType::UnreserveAccount
            | EventType::DeleteAccount
            | EventType::OpenAccount
            | EventType::CloseAccount
            | EventType::GetAccountData => Command::Account {
                account_id: text("account_id")?,
            },
            EventType::AddAccountCache | EventType::WithdrawAccountCache => {
                Command::AccountCache {
                    account_id: text("account_id")?,
                    amount: ctx
                        .i64_field("amount")
                        .ok_or_else(|| missing(event_type, "amount"))?,
                }
            }
        };
        Ok(command)
    }

    pub fn to_body(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }
}

fn missing(event_type: EventType, field: &str) -> SagaError {
    SagaError::InvalidOperationsData {
        operation: event_type.to_string(),
        field: field.to_string(),
    }
}

#[derive(Deserialize)]
struct UserRefBody {
    user_id: Value,
}

#[derive(Deserialize)]
struct UserDataBody {
    user_id: Value,
    #[serde(default)]
    accounts: Vec<Value>,
}

#[derive(Deserialize)]
struct AccountRefBody {
    account_id: Value,
}

#[derive(Deserialize)]
struct AccountDataBody {
    account_id: Value,
    status: String,
    balance: i64,
}

#[derive(Deserialize)]
struct BalanceBody {
    balance: i64,
}

/// Decoded reply body of a successful event.
#[derive(Debug, Clone, PartialEq)]
pub enum EventResult {
    UserRef { user_id: String },
    UserData { user_id: String, accounts: Vec<String> },
    AccountRef { account_id: String },
    AccountData { account_id: String, status: String, balance: i64 },
    Balance { balance: i64 },
    /// The service only acknowledged the request.
    Ack,
}

impl EventResult {
    /// Decodes the reply body of `event_type`.
    pub fn decode(event_type: EventType, body: Option<&Value>) -> Result<Self> {
        let required = || {
            body.cloned().ok_or_else(|| {
                SagaError::InvalidReply(format!("'{event_type}' reply has no result body"))
            })
        };
        let invalid =
            |e: serde_json::Error| SagaError::InvalidReply(format!("'{event_type}' result: {e}"));

        let result = match event_type {
            EventType::CreateUser | EventType::CheckUser => {
                let body: UserRefBody = serde_json::from_value(required()?).map_err(invalid)?;
                EventResult::UserRef {
                    user_id: id_text(event_type, "user_id", body.user_id)?,
                }
            }
            EventType::GetUserData => {
                let body: UserDataBody = serde_json::from_value(required()?).map_err(invalid)?;
                EventResult::UserData {
                    user_id: id_text(event_type, "user_id", body.user_id)?,
                    accounts: body
                        .accounts
                        .into_iter()
                        .map(|a| id_text(event_type, "accounts", a))
                        .collect::<Result<_>>()?,
                }
            }
            EventType::ReserveAccount | EventType::CreateAccount => {
                let body: AccountRefBody = serde_json::from_value(required()?).map_err(invalid)?;
                EventResult::AccountRef {
                    account_id: id_text(event_type, "account_id", body.account_id)?,
                }
            }
            EventType::GetAccountData => {
                let body: AccountDataBody =
                    serde_json::from_value(required()?).map_err(invalid)?;
                EventResult::AccountData {
                    account_id: id_text(event_type, "account_id", body.account_id)?,
                    status: body.status,
                    balance: body.balance,
                }
            }
            EventType::AddAccountCache | EventType::WithdrawAccountCache => {
                let body: BalanceBody = serde_json::from_value(required()?).map_err(invalid)?;
                EventResult::Balance {
                    balance: body.balance,
                }
            }
            EventType::DeleteUser
            | EventType::CheckPassword
            | EventType::AddAccountToUser
            | EventType::RemoveAccountFromUser
            | EventType::UnreserveAccount
            | EventType::DeleteAccount
            | EventType::OpenAccount
            | EventType::CloseAccount
            | EventType::NotifyAccountCreated => EventResult::Ack,
        };
        Ok(result)
    }

    /// Writes the named fields of this result into the saga context.
    pub fn merge_into(&self, ctx: &mut SagaContext) {
        match self {
            EventResult::UserRef { user_id } => ctx.insert("user_id", user_id.clone()),
            EventResult::UserData { user_id, accounts } => {
                ctx.insert("user_id", user_id.clone());
                ctx.insert("accounts", accounts.clone());
            }
            EventResult::AccountRef { account_id } => ctx.insert("account_id", account_id.clone()),
            EventResult::AccountData {
                account_id,
                status,
                balance,
            } => {
                ctx.insert("account_id", account_id.clone());
                ctx.insert("account_status", status.clone());
                ctx.insert("balance", *balance);
            }
            EventResult::Balance { balance } => ctx.insert("balance", *balance),
            EventResult::Ack => {}
        }
    }
}

fn id_text(event_type: EventType, field: &str, value: Value) -> Result<String> {
    match value {
        Value::String(s) if !s.is_empty() => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(SagaError::InvalidReply(format!(
            "'{event_type}' result field '{field}' is not an id: {other}"
        ))),
    }
}
