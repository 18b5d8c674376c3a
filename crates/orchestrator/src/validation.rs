//! Field completeness and semantic checks.

use std::collections::HashMap;

use serde_json::{Map, Value};

use crate::catalog::{EventType, Operation};
use crate::command::SagaContext;
use crate::error::{Result, SagaError};

/// A semantic check evaluated against the accumulated saga context.
pub type CheckFn = fn(&str, &SagaContext) -> Result<()>;

/// Per-operation validation rules.
#[derive(Debug, Clone, Default)]
pub struct ValidationRules {
    required: HashMap<Operation, Vec<&'static str>>,
    checks: HashMap<(Operation, EventType), Vec<&'static str>>,
}

impl ValidationRules {
    pub fn new(
        required: HashMap<Operation, Vec<&'static str>>,
        checks: HashMap<(Operation, EventType), Vec<&'static str>>,
    ) -> Self {
        Self { required, checks }
    }

    /// Rules of the banking back office.
    pub fn banking() -> Self {
        let required = HashMap::from([
            (Operation::CreateUser, vec!["login", "password", "email"]),
            (Operation::AddAccount, vec!["user_id", "currency"]),
            (Operation::AddAccountCache, vec!["user_id", "account_id", "amount"]),
            (Operation::WithdrawAccountCache, vec!["user_id", "account_id", "amount"]),
            (Operation::CloseAccount, vec!["user_id", "account_id"]),
            (Operation::GetUserData, vec!["user_id"]),
            (Operation::CheckPassword, vec!["login", "password"]),
        ]);

        let checks = HashMap::from([
            (
                (Operation::AddAccountCache, EventType::GetUserData),
                vec!["user_owns_account"],
            ),
            (
                (Operation::WithdrawAccountCache, EventType::GetUserData),
                vec!["user_owns_account"],
            ),
            (
                (Operation::CloseAccount, EventType::GetUserData),
                vec!["user_owns_account"],
            ),
            (
                (Operation::AddAccountCache, EventType::GetAccountData),
                vec!["account_is_open"],
            ),
            (
                (Operation::CloseAccount, EventType::GetAccountData),
                vec!["account_is_open"],
            ),
            (
                (Operation::WithdrawAccountCache, EventType::GetAccountData),
                vec!["account_is_open", "sufficient_balance"],
            ),
        ]);

        Self::new(required, checks)
    }

    pub fn required_fields(&self, operation: Operation) -> &[&'static str] {
        self.required
            .get(&operation)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Fails with [`SagaError::InvalidOperationsData`] if a required field is
    /// absent, null or an empty string.
    pub fn check_required(&self, operation: Operation, fields: &Map<String, Value>) -> Result<()> {
        for field in self.required_fields(operation) {
            let present = match fields.get(*field) {
                None | Some(Value::Null) => false,
                Some(Value::String(s)) => !s.trim().is_empty(),
                Some(_) => true,
            };
            if !present {
                return Err(SagaError::InvalidOperationsData {
                    operation: operation.to_string(),
                    field: field.to_string(),
                });
            }
        }
        Ok(())
    }

    pub fn checks_for(&self, operation: Operation, event_type: EventType) -> &[&'static str] {
        self.checks
            .get(&(operation, event_type))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Runs every check registered for `(operation, event_type)`.
    pub fn run_checks(
        &self,
        operation: Operation,
        event_type: EventType,
        ctx: &SagaContext,
    ) -> Result<()> {
        for name in self.checks_for(operation, event_type) {
            let check = resolve(name)
                .ok_or_else(|| SagaError::UnknownAdditionalValidationFunction(name.to_string()))?;
            check(name, ctx)?;
        }
        Ok(())
    }
}

fn resolve(name: &str) -> Option<CheckFn> {
    match name {
        "user_owns_account" => Some(user_owns_account),
        "account_is_open" => Some(account_is_open),
        "sufficient_balance" => Some(sufficient_balance),
        _ => None,
    }
}

fn check_data(check: &str, field: &str) -> SagaError {
    SagaError::CheckData {
        check: check.to_string(),
        field: field.to_string(),
    }
}

fn user_owns_account(check: &str, ctx: &SagaContext) -> Result<()> {
    let accounts = ctx
        .str_list("accounts")
        .ok_or_else(|| check_data(check, "accounts"))?;
    let account_id = ctx
        .str_field("account_id")
        .ok_or_else(|| check_data(check, "account_id"))?;

    if accounts.contains(&account_id) {
        Ok(())
    } else {
        Err(SagaError::CheckFailed {
            check: check.to_string(),
            reason: format!("user does not own account {account_id}"),
        })
    }
}

fn account_is_open(check: &str, ctx: &SagaContext) -> Result<()> {
    let status = ctx
        .str_field("account_status")
        .ok_or_else(|| check_data(check, "account_status"))?;

    if status.eq_ignore_ascii_case("open") {
        Ok(())
    } else {
        Err(SagaError::CheckFailed {
            check: check.to_string(),
            reason: format!("account status is {status}"),
        })
    }
}

fn sufficient_balance(check: &str, ctx: &SagaContext) -> Result<()> {
    let balance = ctx
        .i64_field("balance")
        .ok_or_else(|| check_data(check, "balance"))?;
    let amount = ctx
        .i64_field("amount")
        .ok_or_else(|| check_data(check, "amount"))?;

    if balance >= amount {
        Ok(())
    } else {
        Err(SagaError::CheckFailed {
            check: check.to_string(),
            reason: format!("balance {balance} is below {amount}"),
        })
    }
}
