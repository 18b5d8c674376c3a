//! Static registry of operations, saga types and event types.
//!
//! The catalog maps each [`Operation`] to the root [`SagaType`]s it
//! requires, records the parent/child edges between saga types, and lists
//! the [`EventType`]s (with their server and compensation) that make up each
//! saga type. It is validated once at construction and read-only afterwards.

use std::collections::{HashMap, HashSet};

use saga_store::{Event, Saga};

use crate::error::{CatalogError, Result, SagaError};

macro_rules! named_enum {
    ($(#[$meta:meta])* $name:ident, $kind:literal { $($variant:ident => $str:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            /// Every variant, in declaration order.
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            /// Returns the wire/storage name.
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $str),+
                }
            }
        }

        impl std::str::FromStr for $name {
            type Err = SagaError;

            fn from_str(s: &str) -> Result<Self> {
                match s {
                    $($str => Ok($name::$variant),)+
                    other => Err(SagaError::unknown($kind, other)),
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.as_str())
            }
        }
    };
}

named_enum!(
    /// Downstream service that executes events.
    Server, "server" {
        Users => "users",
        Accounts => "accounts",
        Notification => "notification",
    }
);

impl Server {
    /// The topic the server consumes requests from.
    pub fn topic(&self) -> &'static str {
        match self {
            Server::Users => broker::topics::USERS_REQUESTS,
            Server::Accounts => broker::topics::ACCOUNTS_REQUESTS,
            Server::Notification => broker::topics::NOTIFICATION_REQUESTS,
        }
    }
}

named_enum!(
    /// A single downstream operation, dispatched as one event.
    EventType, "event type" {
        CreateUser => "create_user",
        DeleteUser => "delete_user",
        CheckUser => "check_user",
        CheckPassword => "check_password",
        GetUserData => "get_user_data",
        AddAccountToUser => "add_account_to_user",
        RemoveAccountFromUser => "remove_account_from_user",
        ReserveAccount => "reserve_account",
        UnreserveAccount => "unreserve_account",
        CreateAccount => "create_account",
        DeleteAccount => "delete_account",
        OpenAccount => "open_account",
        CloseAccount => "close_account",
        GetAccountData => "get_account_data",
        AddAccountCache => "add_account_cache",
        WithdrawAccountCache => "withdraw_account_cache",
        NotifyAccountCreated => "notify_account_created",
    }
);

named_enum!(
    /// Template for a saga instance.
    SagaType, "saga type" {
        CreateUser => "create_user",
        CheckUser => "check_user",
        ReserveAccount => "reserve_account",
        CreateAccount => "create_account",
        OpenAccountAndAddToUser => "open_account_and_add_to_user",
        NotifyAccountCreated => "notify_account_created",
        AddAccountCache => "add_account_cache",
        WithdrawAccountCache => "withdraw_account_cache",
        CloseAccount => "close_account",
        RemoveAccountFromUser => "remove_account_from_user",
        GetUserData => "get_user_data",
        CheckPassword => "check_password",
    }
);

named_enum!(
    /// User-facing use case that expands into a tree of sagas.
    Operation, "operation" {
        CreateUser => "create_user",
        AddAccount => "add_account",
        AddAccountCache => "add_account_cache",
        WithdrawAccountCache => "withdraw_account_cache",
        CloseAccount => "close_account",
        GetUserData => "get_user_data",
        CheckPassword => "check_password",
    }
);

impl Operation {
    /// Returns the numeric code used by the request surface.
    pub fn code(&self) -> u8 {
        match self {
            Operation::CreateUser => 1,
            Operation::AddAccount => 2,
            Operation::AddAccountCache => 3,
            Operation::WithdrawAccountCache => 4,
            Operation::CloseAccount => 5,
            Operation::GetUserData => 6,
            Operation::CheckPassword => 7,
        }
    }

    /// Parses a numeric operation code.
    pub fn from_code(code: u8) -> Option<Self> {
        Operation::ALL.iter().copied().find(|op| op.code() == code)
    }
}

/// How a completed event is undone during rollback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compensation {
    /// Dispatch this event type to undo the effect.
    Event(EventType),
    /// The event has no side effects to undo.
    NotRequired,
    /// The event has side effects but nothing can undo them.
    Undefined,
}

#[derive(Debug, Clone)]
pub struct EventDefinition {
    pub event_type: EventType,
    pub server: Server,
    pub compensation: Compensation,
}

#[derive(Debug, Clone)]
pub struct SagaDefinition {
    pub saga_type: SagaType,
    /// Events in dispatch order.
    pub events: Vec<EventType>,
    pub parents: Vec<SagaType>,
    pub children: Vec<SagaType>,
}

#[derive(Debug, Clone)]
pub struct OperationDefinition {
    pub operation: Operation,
    pub roots: Vec<SagaType>,
}

/// A saga produced by [`SagaCatalog::expand`], with its first event.
#[derive(Debug, Clone)]
pub struct ExpandedSaga {
    pub saga: Saga,
    pub first_event: Event,
}

/// Immutable, startup-validated saga registry.
#[derive(Debug, Clone)]
pub struct SagaCatalog {
    events: HashMap<EventType, EventDefinition>,
    sagas: HashMap<SagaType, SagaDefinition>,
    operations: HashMap<Operation, OperationDefinition>,
}

impl SagaCatalog {
    /// Builds a catalog from definition tables, validating it.
    pub fn new(
        events: Vec<EventDefinition>,
        sagas: Vec<SagaDefinition>,
        operations: Vec<OperationDefinition>,
    ) -> std::result::Result<Self, CatalogError> {
        let catalog = Self {
            events: events.into_iter().map(|d| (d.event_type, d)).collect(),
            sagas: sagas.into_iter().map(|d| (d.saga_type, d)).collect(),
            operations: operations.into_iter().map(|d| (d.operation, d)).collect(),
        };
        catalog.validate()?;
        Ok(catalog)
    }

    /// The catalog of the banking back office.
    pub fn banking() -> std::result::Result<Self, CatalogError> {
        use Compensation::{Event as Revert, NotRequired, Undefined};

        let event = |event_type, server, compensation| EventDefinition {
            event_type,
            server,
            compensation,
        };
        let events = vec![
            event(EventType::CreateUser, Server::Users, Revert(EventType::DeleteUser)),
            event(EventType::DeleteUser, Server::Users, Undefined),
            event(EventType::CheckUser, Server::Users, NotRequired),
            event(EventType::CheckPassword, Server::Users, NotRequired),
            event(EventType::GetUserData, Server::Users, NotRequired),
            event(
                EventType::AddAccountToUser,
                Server::Users,
                Revert(EventType::RemoveAccountFromUser),
            ),
            event(
                EventType::RemoveAccountFromUser,
                Server::Users,
                Revert(EventType::AddAccountToUser),
            ),
            event(
                EventType::ReserveAccount,
                Server::Accounts,
                Revert(EventType::UnreserveAccount),
            ),
            event(EventType::UnreserveAccount, Server::Accounts, Undefined),
            event(
                EventType::CreateAccount,
                Server::Accounts,
                Revert(EventType::DeleteAccount),
            ),
            event(EventType::DeleteAccount, Server::Accounts, Undefined),
            event(
                EventType::OpenAccount,
                Server::Accounts,
                Revert(EventType::CloseAccount),
            ),
            event(EventType::CloseAccount, Server::Accounts, Undefined),
            event(EventType::GetAccountData, Server::Accounts, NotRequired),
            event(
                EventType::AddAccountCache,
                Server::Accounts,
                Revert(EventType::WithdrawAccountCache),
            ),
            event(
                EventType::WithdrawAccountCache,
                Server::Accounts,
                Revert(EventType::AddAccountCache),
            ),
            event(EventType::NotifyAccountCreated, Server::Notification, NotRequired),
        ];

        let saga = |saga_type, events: &[EventType], parents: &[SagaType], children: &[SagaType]| {
            SagaDefinition {
                saga_type,
                events: events.to_vec(),
                parents: parents.to_vec(),
                children: children.to_vec(),
            }
        };
        let sagas = vec![
            saga(SagaType::CreateUser, &[EventType::CreateUser], &[], &[]),
            saga(
                SagaType::CheckUser,
                &[EventType::CheckUser],
                &[],
                &[SagaType::ReserveAccount],
            ),
            saga(
                SagaType::ReserveAccount,
                &[EventType::ReserveAccount],
                &[SagaType::CheckUser],
                &[SagaType::CreateAccount],
            ),
            saga(
                SagaType::CreateAccount,
                &[EventType::CreateAccount],
                &[SagaType::ReserveAccount],
                &[
                    SagaType::OpenAccountAndAddToUser,
                    SagaType::NotifyAccountCreated,
                ],
            ),
            saga(
                SagaType::OpenAccountAndAddToUser,
                &[EventType::OpenAccount, EventType::AddAccountToUser],
                &[SagaType::CreateAccount],
                &[],
            ),
            saga(
                SagaType::NotifyAccountCreated,
                &[EventType::NotifyAccountCreated],
                &[SagaType::CreateAccount],
                &[],
            ),
            saga(
                SagaType::AddAccountCache,
                &[
                    EventType::GetUserData,
                    EventType::GetAccountData,
                    EventType::AddAccountCache,
                ],
                &[],
                &[],
            ),
            saga(
                SagaType::WithdrawAccountCache,
                &[
                    EventType::GetUserData,
                    EventType::GetAccountData,
                    EventType::WithdrawAccountCache,
                ],
                &[],
                &[],
            ),
            saga(
                SagaType::CloseAccount,
                &[
                    EventType::GetUserData,
                    EventType::GetAccountData,
                    EventType::CloseAccount,
                ],
                &[],
                &[SagaType::RemoveAccountFromUser],
            ),
            saga(
                SagaType::RemoveAccountFromUser,
                &[EventType::RemoveAccountFromUser],
                &[SagaType::CloseAccount],
                &[],
            ),
            saga(SagaType::GetUserData, &[EventType::GetUserData], &[], &[]),
            saga(SagaType::CheckPassword, &[EventType::CheckPassword], &[], &[]),
        ];

        let operation = |operation, roots: &[SagaType]| OperationDefinition {
            operation,
            roots: roots.to_vec(),
        };
        let operations = vec![
            operation(Operation::CreateUser, &[SagaType::CreateUser]),
            operation(Operation::AddAccount, &[SagaType::CheckUser]),
            operation(Operation::AddAccountCache, &[SagaType::AddAccountCache]),
            operation(Operation::WithdrawAccountCache, &[SagaType::WithdrawAccountCache]),
            operation(Operation::CloseAccount, &[SagaType::CloseAccount]),
            operation(Operation::GetUserData, &[SagaType::GetUserData]),
            operation(Operation::CheckPassword, &[SagaType::CheckPassword]),
        ];

        Self::new(events, sagas, operations)
    }

    /// Checks the structural invariants of the catalog.
    pub fn validate(&self) -> std::result::Result<(), CatalogError> {
        for def in self.sagas.values() {
            if def.events.is_empty() {
                return Err(CatalogError::EmptySaga(def.saga_type.to_string()));
            }
            if let Some(event) = def.events.iter().find(|e| !self.events.contains_key(e)) {
                return Err(CatalogError::UnknownEventType {
                    saga: def.saga_type.to_string(),
                    event: event.to_string(),
                });
            }
            for related in def.parents.iter().chain(&def.children) {
                if !self.sagas.contains_key(related) {
                    return Err(CatalogError::UnknownSagaType {
                        referenced_by: def.saga_type.to_string(),
                        missing: related.to_string(),
                    });
                }
            }
            for child in &def.children {
                if !self.sagas[child].parents.contains(&def.saga_type) {
                    return Err(CatalogError::EdgeMismatch {
                        parent: def.saga_type.to_string(),
                        child: child.to_string(),
                    });
                }
            }
            for parent in &def.parents {
                if !self.sagas[parent].children.contains(&def.saga_type) {
                    return Err(CatalogError::EdgeMismatch {
                        parent: parent.to_string(),
                        child: def.saga_type.to_string(),
                    });
                }
            }
        }

        for def in self.events.values() {
            if let Compensation::Event(revert) = def.compensation
                && !self.events.contains_key(&revert)
            {
                return Err(CatalogError::UnknownEventType {
                    saga: def.event_type.to_string(),
                    event: revert.to_string(),
                });
            }
        }

        for def in self.operations.values() {
            if def.roots.is_empty() {
                return Err(CatalogError::NoRoots(def.operation.to_string()));
            }
            if let Some(root) = def.roots.iter().find(|r| !self.sagas.contains_key(r)) {
                return Err(CatalogError::UnknownSagaType {
                    referenced_by: def.operation.to_string(),
                    missing: root.to_string(),
                });
            }
        }

        self.check_acyclic()
    }

    fn check_acyclic(&self) -> std::result::Result<(), CatalogError> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Visiting,
            Done,
        }

        fn visit(
            catalog: &SagaCatalog,
            node: SagaType,
            marks: &mut HashMap<SagaType, Mark>,
        ) -> std::result::Result<(), CatalogError> {
            match marks.get(&node) {
                Some(Mark::Done) => return Ok(()),
                Some(Mark::Visiting) => return Err(CatalogError::Cycle(node.to_string())),
                None => {}
            }
            marks.insert(node, Mark::Visiting);
            for child in &catalog.sagas[&node].children {
                visit(catalog, *child, marks)?;
            }
            marks.insert(node, Mark::Done);
            Ok(())
        }

        let mut marks = HashMap::new();
        let mut nodes: Vec<_> = self.sagas.keys().copied().collect();
        nodes.sort();
        for node in nodes {
            visit(self, node, &mut marks)?;
        }
        Ok(())
    }

    pub fn operation(&self, operation: Operation) -> Option<&OperationDefinition> {
        self.operations.get(&operation)
    }

    pub fn saga(&self, saga_type: SagaType) -> Option<&SagaDefinition> {
        self.sagas.get(&saga_type)
    }

    pub fn event(&self, event_type: EventType) -> Option<&EventDefinition> {
        self.events.get(&event_type)
    }

    /// Looks up a saga definition by its persisted name.
    pub fn saga_by_name(&self, name: &str) -> Result<&SagaDefinition> {
        let saga_type: SagaType = name.parse()?;
        self.saga(saga_type)
            .ok_or_else(|| SagaError::unknown("saga type", name))
    }

    /// Looks up an event definition by its persisted name.
    pub fn event_by_name(&self, name: &str) -> Result<&EventDefinition> {
        let event_type: EventType = name.parse()?;
        self.event(event_type)
            .ok_or_else(|| SagaError::unknown("event type", name))
    }

    /// Instantiates one saga per root saga type of `operation`, each with
    /// its first event in status Created. Nothing is persisted.
    pub fn expand(
        &self,
        operation: Operation,
        input: &serde_json::Value,
    ) -> Result<Vec<ExpandedSaga>> {
        let def = self
            .operation(operation)
            .ok_or(SagaError::InvalidOperation(operation.code()))?;

        def.roots
            .iter()
            .map(|root| {
                let saga = Saga::root(operation.as_str(), root.as_str(), input.clone());
                let first_event = self.first_event(&saga, *root)?;
                Ok(ExpandedSaga { saga, first_event })
            })
            .collect()
    }

    /// Builds the first event of a freshly created saga.
    pub fn first_event(&self, saga: &Saga, saga_type: SagaType) -> Result<Event> {
        let first = self
            .saga(saga_type)
            .and_then(|def| def.events.first())
            .ok_or_else(|| SagaError::unknown("saga type", saga_type.as_str()))?;
        Ok(Event::new(saga.saga_uuid, first.as_str()))
    }

    /// Every saga type reachable from the operation's roots through child edges.
    pub fn reachable_saga_types(&self, operation: Operation) -> Vec<SagaType> {
        let Some(def) = self.operation(operation) else {
            return Vec::new();
        };

        let mut seen = HashSet::new();
        let mut order = Vec::new();
        let mut stack: Vec<SagaType> = def.roots.iter().rev().copied().collect();
        while let Some(node) = stack.pop() {
            if !seen.insert(node) {
                continue;
            }
            order.push(node);
            if let Some(saga) = self.saga(node) {
                stack.extend(saga.children.iter().rev().copied());
            }
        }
        order
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> SagaCatalog {
        SagaCatalog::banking().unwrap()
    }

    #[test]
    fn test_banking_catalog_is_valid() {
        let catalog = catalog();
        for op in Operation::ALL {
            assert!(catalog.operation(*op).is_some(), "{op} missing");
        }
        for saga_type in SagaType::ALL {
            assert!(catalog.saga(*saga_type).is_some(), "{saga_type} missing");
        }
        for event_type in EventType::ALL {
            assert!(catalog.event(*event_type).is_some(), "{event_type} missing");
        }
    }

    #[test]
    fn test_operation_codes_round_trip() {
        for op in Operation::ALL {
            assert_eq!(Operation::from_code(op.code()), Some(*op));
        }
        assert_eq!(Operation::from_code(0), None);
        assert_eq!(Operation::from_code(200), None);
    }

    #[test]
    fn test_names_parse() {
        assert_eq!("reserve_account".parse::<EventType>().unwrap(), EventType::ReserveAccount);
        assert_eq!(
            "open_account_and_add_to_user".parse::<SagaType>().unwrap(),
            SagaType::OpenAccountAndAddToUser
        );
        assert!(matches!(
            "transfer".parse::<Operation>(),
            Err(SagaError::UnknownName { kind: "operation", .. })
        ));
    }

    #[test]
    fn test_expand_create_user() {
        let catalog = catalog();
        let input = serde_json::json!({"login": "ann"});
        let expanded = catalog.expand(Operation::CreateUser, &input).unwrap();

        assert_eq!(expanded.len(), 1);
        let root = &expanded[0];
        assert!(root.saga.is_root());
        assert_eq!(root.saga.saga_type, "create_user");
        assert_eq!(root.saga.operation, "create_user");
        assert_eq!(root.saga.saga_data, input);
        assert_eq!(root.first_event.event_name, "create_user");
        assert_eq!(root.first_event.saga_uuid, root.saga.saga_uuid);
        assert_eq!(root.first_event.event_status, saga_store::EventStatus::Created);
    }

    #[test]
    fn test_reachable_from_add_account() {
        let reachable = catalog().reachable_saga_types(Operation::AddAccount);
        assert_eq!(
            reachable,
            vec![
                SagaType::CheckUser,
                SagaType::ReserveAccount,
                SagaType::CreateAccount,
                SagaType::OpenAccountAndAddToUser,
                SagaType::NotifyAccountCreated,
            ]
        );
    }

    #[test]
    fn test_every_child_edge_is_reachable_and_acyclic() {
        let catalog = catalog();
        for op in Operation::ALL {
            let reachable = catalog.reachable_saga_types(*op);
            let unique: HashSet<_> = reachable.iter().collect();
            assert_eq!(unique.len(), reachable.len());
            for saga_type in &reachable {
                for child in &catalog.saga(*saga_type).unwrap().children {
                    assert!(reachable.contains(child));
                }
            }
        }
        assert!(catalog.check_acyclic().is_ok());
    }

    fn tiny_events() -> Vec<EventDefinition> {
        vec![EventDefinition {
            event_type: EventType::CheckUser,
            server: Server::Users,
            compensation: Compensation::NotRequired,
        }]
    }

    #[test]
    fn test_rejects_empty_saga() {
        let result = SagaCatalog::new(
            tiny_events(),
            vec![SagaDefinition {
                saga_type: SagaType::CheckUser,
                events: vec![],
                parents: vec![],
                children: vec![],
            }],
            vec![],
        );
        assert_eq!(result.unwrap_err(), CatalogError::EmptySaga("check_user".into()));
    }

    #[test]
    fn test_rejects_cycle() {
        let result = SagaCatalog::new(
            tiny_events(),
            vec![
                SagaDefinition {
                    saga_type: SagaType::CheckUser,
                    events: vec![EventType::CheckUser],
                    parents: vec![SagaType::ReserveAccount],
                    children: vec![SagaType::ReserveAccount],
                },
                SagaDefinition {
                    saga_type: SagaType::ReserveAccount,
                    events: vec![EventType::CheckUser],
                    parents: vec![SagaType::CheckUser],
                    children: vec![SagaType::CheckUser],
                },
            ],
            vec![],
        );
        assert!(matches!(result, Err(CatalogError::Cycle(_))));
    }

    #[test]
    fn test_rejects_one_sided_edge() {
        let result = SagaCatalog::new(
            tiny_events(),
            vec![
                SagaDefinition {
                    saga_type: SagaType::CheckUser,
                    events: vec![EventType::CheckUser],
                    parents: vec![],
                    children: vec![SagaType::ReserveAccount],
                },
                SagaDefinition {
                    saga_type: SagaType::ReserveAccount,
                    events: vec![EventType::CheckUser],
                    parents: vec![],
                    children: vec![],
                },
            ],
            vec![],
        );
        assert!(matches!(result, Err(CatalogError::EdgeMismatch { .. })));
    }

    #[test]
    fn test_rejects_unknown_root_and_empty_roots() {
        let sagas = vec![SagaDefinition {
            saga_type: SagaType::CheckUser,
            events: vec![EventType::CheckUser],
            parents: vec![],
            children: vec![],
        }];

        let result = SagaCatalog::new(
            tiny_events(),
            sagas.clone(),
            vec![OperationDefinition {
                operation: Operation::AddAccount,
                roots: vec![],
            }],
        );
        assert_eq!(result.unwrap_err(), CatalogError::NoRoots("add_account".into()));

        let result = SagaCatalog::new(
            tiny_events(),
            sagas,
            vec![OperationDefinition {
                operation: Operation::AddAccount,
                roots: vec![SagaType::CreateUser],
            }],
        );
        assert!(matches!(result, Err(CatalogError::UnknownSagaType { .. })));
    }

    #[test]
    fn test_rejects_unknown_event() {
        let result = SagaCatalog::new(
            tiny_events(),
            vec![SagaDefinition {
                saga_type: SagaType::CheckUser,
                events: vec![EventType::CreateUser],
                parents: vec![],
                children: vec![],
            }],
            vec![],
        );
        assert!(matches!(result, Err(CatalogError::UnknownEventType { .. })));
    }
}
