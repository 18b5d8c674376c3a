//! Saga orchestrator: the entry points that start operations and reconcile
//! replies.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use broker::{MessageBroker, ReplyEnvelope, SagaNotice, topics};
use common::{EventId, SagaId};
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use saga_store::{
    ConnectionStatus, Event, EventStatus, Saga, SagaConnection, SagaStatus, SagaStore,
};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::catalog::{EventType, Operation, SagaCatalog, SagaType};
use crate::command::{EventResult, SagaContext};
use crate::config::OrchestratorConfig;
use crate::dispatcher::Dispatcher;
use crate::error::{Result, SagaError};
use crate::event_machine::{self, EventAction};
use crate::locks::TreeLocks;
use crate::saga_machine::{self, CompensationStep};
use crate::validation::ValidationRules;

/// Result of reconciling one reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ReconcileOutcome {
    /// The event moved to a new status.
    Advanced {
        event_status: EventStatus,
        saga_status: SagaStatus,
    },
    /// The event was already terminal; nothing changed.
    Duplicate { event_status: EventStatus },
}

/// Snapshot of a saga for polling.
#[derive(Debug, Clone, Serialize)]
pub struct SagaView {
    pub saga: Saga,
    pub events: Vec<Event>,
    /// Edges to the sagas spawned by this one.
    pub children: Vec<SagaConnection>,
    /// Edges from the saga that spawned this one.
    pub parents: Vec<SagaConnection>,
}

/// Drives operations through the saga catalog.
///
/// Every state-machine step runs under the lock of the operation tree it
/// touches and persists each status change before acting on it. Replies may
/// be delivered more than once; a reply for a terminal event is a no-op.
pub struct Orchestrator<S, B>
where
    S: SagaStore,
    B: MessageBroker,
{
    store: S,
    dispatcher: Dispatcher<B>,
    catalog: Arc<SagaCatalog>,
    rules: Arc<ValidationRules>,
    locks: TreeLocks,
    config: OrchestratorConfig,
}

impl<S, B> Orchestrator<S, B>
where
    S: SagaStore + 'static,
    B: MessageBroker + 'static,
{
    /// Creates an orchestrator over an explicit dispatcher and rule set.
    pub fn new(
        store: S,
        dispatcher: Dispatcher<B>,
        rules: Arc<ValidationRules>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            store,
            catalog: dispatcher.catalog().clone(),
            dispatcher,
            rules,
            locks: TreeLocks::new(),
            config,
        }
    }

    /// Creates an orchestrator for the banking catalog and rules.
    pub fn banking(store: S, broker: B, config: OrchestratorConfig) -> Result<Self> {
        let catalog = Arc::new(SagaCatalog::banking()?);
        let dispatcher = Dispatcher::new(broker, catalog, config.publish_timeout);
        Ok(Self::new(
            store,
            dispatcher,
            Arc::new(ValidationRules::banking()),
            config,
        ))
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn catalog(&self) -> &SagaCatalog {
        &self.catalog
    }

    pub fn rules(&self) -> &ValidationRules {
        &self.rules
    }

    /// Starts an operation and returns the id of its (first) root saga.
    ///
    /// Input is validated and every first request is built before anything
    /// is written, so an input error persists nothing. The rest of the
    /// operation proceeds as replies arrive. If some roots cannot be
    /// dispatched the others still are, and [`SagaError::Undispatched`]
    /// names the operation and the roots to retry.
    #[tracing::instrument(skip(self, fields))]
    pub async fn start_operation(&self, code: u8, fields: Map<String, Value>) -> Result<SagaId> {
        // 1. Validate the request
        let operation = Operation::from_code(code).ok_or(SagaError::InvalidOperation(code))?;
        self.rules.check_required(operation, &fields)?;

        // 2. Expand the catalog and build every first request
        let input = Value::Object(fields);
        let ctx = SagaContext::from_value(&input);
        let roots = self.catalog.expand(operation, &input)?;
        for root in &roots {
            self.dispatcher.prepare(&root.first_event, &ctx)?;
        }
        let root_id = roots
            .first()
            .map(|root| root.saga.saga_uuid)
            .ok_or(SagaError::InvalidOperation(code))?;

        // 3. Persist every root, then dispatch each under its tree lock
        for root in &roots {
            self.store_call(self.store.create_saga(&root.saga)).await?;
            self.store_call(self.store.create_event(&root.first_event))
                .await?;
        }

        let mut undispatched = Vec::new();
        let mut first_error = None;
        for root in roots {
            let saga_id = root.saga.saga_uuid;
            let _guard = self.locks.lock(saga_id).await;
            let mut event = root.first_event;
            if let Err(e) = self.dispatch_event(&root.saga, &mut event, &ctx).await {
                undispatched.push(saga_id);
                first_error.get_or_insert(e);
            }
        }
        if let Some(source) = first_error {
            return Err(SagaError::Undispatched {
                saga_id: root_id,
                undispatched,
                source: Box::new(source),
            });
        }

        metrics::counter!("saga_operations_started_total", "operation" => operation.as_str())
            .increment(1);
        tracing::info!(
            operation = %operation,
            saga_id = %root_id,
            "operation started"
        );
        Ok(root_id)
    }

    /// Applies a reply to an event and runs the consequences.
    ///
    /// Fails with [`SagaError::InvalidEventStatus`] for an event that was
    /// never dispatched. A reply for an already-terminal event only resumes
    /// requests left undispatched by an earlier failed attempt.
    #[tracing::instrument(skip(self, result), fields(saga_id = %saga_id, event_id = %event_id))]
    pub async fn reconcile(
        &self,
        saga_id: SagaId,
        event_id: EventId,
        success: bool,
        result: Option<Value>,
    ) -> Result<ReconcileOutcome> {
        self.reconcile_reply(saga_id, event_id, None, success, result)
            .await
    }

    /// Decodes a reply received on `topic` and reconciles it.
    ///
    /// Replies on the results topic are successes, replies on the errors
    /// topic failures.
    pub async fn handle_message(&self, topic: &str, payload: &[u8]) -> Result<ReconcileOutcome> {
        let success = match topic {
            topics::ORCHESTRATOR_RESULTS => true,
            topics::ORCHESTRATOR_ERRORS => false,
            other => {
                return Err(SagaError::InvalidReply(format!(
                    "unexpected reply topic '{other}'"
                )));
            }
        };
        let reply =
            ReplyEnvelope::decode(payload).map_err(|e| SagaError::InvalidReply(e.to_string()))?;
        self.handle_reply(success, reply).await
    }

    /// Reconciles a decoded reply. The reply's operation name must match the
    /// event it answers; an error string without a result is stored as
    /// `{"error": ...}`.
    #[tracing::instrument(
        skip(self, reply),
        fields(saga_id = %reply.saga_uuid, event_id = %reply.event_uuid)
    )]
    pub async fn handle_reply(&self, success: bool, reply: ReplyEnvelope) -> Result<ReconcileOutcome> {
        let result = match (success, reply.result, reply.error) {
            (false, None, Some(error)) => Some(serde_json::json!({ "error": error })),
            (_, result, _) => result,
        };

        self.reconcile_reply(
            reply.saga_uuid,
            reply.event_uuid,
            Some(reply.operation_name.as_str()),
            success,
            result,
        )
        .await
    }

    async fn reconcile_reply(
        &self,
        saga_id: SagaId,
        event_id: EventId,
        operation_name: Option<&str>,
        success: bool,
        result: Option<Value>,
    ) -> Result<ReconcileOutcome> {
        let started = Instant::now();
        let root = self.load_saga(saga_id).await?.root_saga_uuid;
        let _guard = self.locks.lock(root).await;

        let saga = self.load_saga(saga_id).await?;
        let mut event = self.load_event(event_id).await?;
        if event.saga_uuid != saga_id {
            return Err(SagaError::InvalidReply(format!(
                "event {event_id} does not belong to saga {saga_id}"
            )));
        }
        if let Some(name) = operation_name
            && name != event.event_name
        {
            return Err(SagaError::InvalidReply(format!(
                "reply for '{name}' does not match event '{}'",
                event.event_name
            )));
        }
        if event.event_status == EventStatus::Created {
            return Err(SagaError::InvalidEventStatus {
                event_id,
                status: event.event_status,
                success,
            });
        }

        let mut success = success;
        if success && event.event_status == EventStatus::InProgress {
            success = self.verify_result(&saga, &event, result.as_ref()).await?;
        }

        let transition = event_machine::advance(&event, success)?;
        if transition.action == EventAction::None {
            metrics::counter!("saga_duplicate_replies_total").increment(1);
            tracing::info!(status = %event.event_status, "duplicate reply ignored");
            let mut alerts = Vec::new();
            self.resume_pending(&saga, &event, &mut alerts).await?;
            return Ok(ReconcileOutcome::Duplicate {
                event_status: event.event_status,
            });
        }

        // Write-ahead: the new status is stored before any consequence runs.
        let previous = event.event_status;
        event.event_status = transition.status;
        if result.is_some() {
            event.event_result = result;
        }
        self.store_call(self.store.update_event(&event, previous))
            .await?;
        metrics::counter!(
            "saga_replies_total",
            "outcome" => if success { "success" } else { "failure" }
        )
        .increment(1);
        tracing::info!(
            event_type = %event.event_name,
            status = %event.event_status,
            "event advanced"
        );

        let mut alerts = Vec::new();
        match transition.action {
            EventAction::NotifySagaCompletion => {
                self.on_event_completed(saga_id, &mut alerts).await?
            }
            EventAction::NotifySagaFailure => self.on_event_failed(saga_id, &mut alerts).await?,
            EventAction::NotifySagaRollbackDone => {
                self.try_compensate(saga_id, &mut alerts).await?
            }
            EventAction::NotifySagaRollbackFailed => {
                self.finalize(
                    saga_id,
                    SagaStatus::FallBackError,
                    ConnectionStatus::Failed,
                    &mut alerts,
                )
                .await?
            }
            EventAction::Dispatch | EventAction::None => {}
        }

        metrics::histogram!("saga_reconcile_duration_seconds")
            .record(started.elapsed().as_secs_f64());

        if let Some(alert) = alerts.into_iter().next() {
            return Err(alert);
        }

        let saga_status = self.load_saga(saga_id).await?.saga_status;
        Ok(ReconcileOutcome::Advanced {
            event_status: event.event_status,
            saga_status,
        })
    }

    /// Re-dispatches the saga's undispatched event, if it has one.
    #[tracing::instrument(skip(self))]
    pub async fn retry_pending(&self, saga_id: SagaId) -> Result<Option<EventId>> {
        let root = self.load_saga(saga_id).await?.root_saga_uuid;
        let _guard = self.locks.lock(root).await;

        let saga = self.load_saga(saga_id).await?;
        self.redispatch_created(&saga).await
    }

    /// Loads a saga with its events and connections.
    pub async fn saga_view(&self, saga_id: SagaId) -> Result<Option<SagaView>> {
        let Some(saga) = self.store_call(self.store.get_saga(saga_id)).await? else {
            return Ok(None);
        };
        let events = self.load_events(saga_id).await?;
        let children = self
            .store_call(self.store.get_connections_by_parent(saga_id))
            .await?;
        let parents = self
            .store_call(self.store.get_connections_by_child(saga_id))
            .await?;

        Ok(Some(SagaView {
            saga,
            events,
            children,
            parents,
        }))
    }

    /// Decodes a success result and runs the semantic checks registered for
    /// the event. Returns false if the reply must be treated as a failure.
    async fn verify_result(&self, saga: &Saga, event: &Event, result: Option<&Value>) -> Result<bool> {
        if event.event_is_roll_back {
            return Ok(true);
        }

        let event_type: EventType = event.event_name.parse()?;
        let decoded = match EventResult::decode(event_type, result) {
            Ok(decoded) => decoded,
            Err(e) => {
                tracing::warn!(error = %e, "undecodable result, failing event");
                return Ok(false);
            }
        };

        let events = self.load_events(saga.saga_uuid).await?;
        let mut ctx = self.context_for(saga, &events)?;
        ctx.merge_result(&decoded);

        let operation: Operation = saga.operation.parse()?;
        match self.rules.run_checks(operation, event_type, &ctx) {
            Ok(()) => Ok(true),
            Err(
                e @ (SagaError::CheckFailed { .. }
                | SagaError::CheckData { .. }
                | SagaError::UnknownAdditionalValidationFunction(_)),
            ) => {
                tracing::warn!(error = %e, "semantic check rejected result, failing event");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Saga data merged with the results of its completed forward events.
    fn context_for(&self, saga: &Saga, events: &[Event]) -> Result<SagaContext> {
        let mut ctx = SagaContext::from_value(&saga.saga_data);
        for event in events
            .iter()
            .filter(|e| !e.event_is_roll_back && e.event_status == EventStatus::Completed)
        {
            let event_type: EventType = event.event_name.parse()?;
            ctx.merge_result(&EventResult::decode(
                event_type,
                event.event_result.as_ref(),
            )?);
        }
        Ok(ctx)
    }

    /// Publishes a Created event's request, then stores its in-flight status.
    ///
    /// The event stays Created unless both steps succeed, so a failed attempt
    /// can always be re-dispatched. A reply to the request waits on the tree
    /// lock held by the caller.
    async fn dispatch_event(&self, saga: &Saga, event: &mut Event, ctx: &SagaContext) -> Result<()> {
        let message = self.dispatcher.prepare(event, ctx)?;
        let transition = event_machine::advance(event, true)?;

        if let Err(e) = self.dispatcher.publish(&message).await {
            tracing::warn!(
                error = %e,
                saga_id = %saga.saga_uuid,
                event_id = %event.event_uuid,
                "publish failed, event left undispatched"
            );
            return Err(e);
        }

        let previous = event.event_status;
        event.event_status = transition.status;
        if let Err(e) = self.store_call(self.store.update_event(event, previous)).await {
            tracing::warn!(
                error = %e,
                saga_id = %saga.saga_uuid,
                event_id = %event.event_uuid,
                "request published but not recorded, event left undispatched"
            );
            event.event_status = previous;
            return Err(e);
        }

        if !event.event_is_roll_back
            && matches!(saga.saga_status, SagaStatus::Created | SagaStatus::InProcess)
        {
            let def = self.catalog.saga_by_name(&saga.saga_type)?;
            let events = self.load_events(saga.saga_uuid).await?;
            let status = saga_machine::derive_forward_status(def, &events);
            if status != saga.saga_status {
                self.store_call(self.store.update_saga_status(saga.saga_uuid, status))
                    .await?;
            }
        }
        tracing::info!(
            saga_id = %saga.saga_uuid,
            event_id = %event.event_uuid,
            event_type = %event.event_name,
            "event dispatched"
        );
        Ok(())
    }

    /// Dispatches a freshly created event. If its request cannot be built
    /// the event fails in place and the saga enters rollback.
    fn launch<'a>(
        &'a self,
        saga: &'a Saga,
        mut event: Event,
        ctx: &'a SagaContext,
        alerts: &'a mut Vec<SagaError>,
    ) -> BoxFuture<'a, Result<()>> {
        async move {
            let e = match self.dispatch_event(saga, &mut event, ctx).await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_retryable() => return Err(e),
                Err(e) => e,
            };

            tracing::error!(
                error = %e,
                saga_id = %saga.saga_uuid,
                event_type = %event.event_name,
                "event cannot be dispatched, failing it"
            );
            let previous = event.event_status;
            if event.event_is_roll_back {
                event.event_status = EventStatus::FallBackError;
                self.store_call(self.store.update_event(&event, previous))
                    .await?;
                self.finalize(
                    saga.saga_uuid,
                    SagaStatus::FallBackError,
                    ConnectionStatus::Failed,
                    alerts,
                )
                .await
            } else {
                event.event_status = EventStatus::Error;
                self.store_call(self.store.update_event(&event, previous))
                    .await?;
                self.on_event_failed(saga.saga_uuid, alerts).await
            }
        }
        .boxed()
    }

    /// Finishes work an earlier attempt left undone: dispatches the Created
    /// events of the saga and its waiting children, and replays the
    /// consequence of `event` if the saga stalled after it was stored.
    async fn resume_pending(
        &self,
        saga: &Saga,
        event: &Event,
        alerts: &mut Vec<SagaError>,
    ) -> Result<()> {
        self.redispatch_created(saga).await?;

        let children = self
            .store_call(self.store.get_connections_by_parent(saga.saga_uuid))
            .await?;
        for connection in children
            .iter()
            .filter(|c| c.connection_status == ConnectionStatus::Waiting)
        {
            let child = self.load_saga(connection.next_saga_uuid).await?;
            self.redispatch_created(&child).await?;
        }

        let saga = self.load_saga(saga.saga_uuid).await?;
        let events = self.load_events(saga.saga_uuid).await?;
        if saga.saga_status.is_terminal() || saga_machine::active_event(&events).is_some() {
            return Ok(());
        }

        match (saga.saga_status, event.event_status) {
            (SagaStatus::FallBackInProcess, _) => self.try_compensate(saga.saga_uuid, alerts).await,
            (_, EventStatus::Completed) if !event.event_is_roll_back => {
                tracing::info!(saga_id = %saga.saga_uuid, "replaying completion of stalled saga");
                self.on_event_completed(saga.saga_uuid, alerts).await
            }
            (_, EventStatus::Error) => self.on_event_failed(saga.saga_uuid, alerts).await,
            _ => Ok(()),
        }
    }

    async fn redispatch_created(&self, saga: &Saga) -> Result<Option<EventId>> {
        let events = self.load_events(saga.saga_uuid).await?;
        let Some(pending) = events
            .iter()
            .find(|e| e.event_status == EventStatus::Created)
        else {
            return Ok(None);
        };

        let mut event = pending.clone();
        let ctx = self.context_for(saga, &events)?;
        tracing::info!(saga_id = %saga.saga_uuid, event_id = %event.event_uuid, "re-dispatching pending event");
        self.dispatch_event(saga, &mut event, &ctx).await?;
        Ok(Some(event.event_uuid))
    }

    fn on_event_completed<'a>(
        &'a self,
        saga_id: SagaId,
        alerts: &'a mut Vec<SagaError>,
    ) -> BoxFuture<'a, Result<()>> {
        async move {
            let saga = self.load_saga(saga_id).await?;
            match saga.saga_status {
                status if status.is_terminal() => return Ok(()),
                SagaStatus::FallBackInProcess => return self.try_compensate(saga_id, alerts).await,
                _ => {}
            }

            // A parent started rolling back while this saga was running.
            if self.parent_rolling_back(saga_id).await? {
                tracing::info!(saga_id = %saga_id, "parent is rolling back, rolling back child");
                self.enter_rollback(saga_id).await?;
                return self.try_compensate(saga_id, alerts).await;
            }

            let events = self.load_events(saga_id).await?;
            let def = self.catalog.saga_by_name(&saga.saga_type)?;
            let ctx = self.context_for(&saga, &events)?;

            // 1. Next event of this saga
            if let Some(next) = saga_machine::next_forward_event(def, &events) {
                let event = Event::new(saga_id, next.as_str());
                self.store_call(self.store.create_event(&event)).await?;
                return self.launch(&saga, event, &ctx, alerts).await;
            }

            // 2. Saga completed
            saga_machine::check_forward_status(saga_id, def, &events, SagaStatus::Completed)?;
            self.store_call(self.store.update_saga_status(saga_id, SagaStatus::Completed))
                .await?;
            self.notify(&saga, SagaStatus::Completed).await;
            tracing::info!(saga_id = %saga_id, saga_type = %saga.saga_type, "saga completed");

            for connection in self
                .store_call(self.store.get_connections_by_child(saga_id))
                .await?
            {
                self.store_call(self.store.update_saga_connection(
                    connection.current_saga_uuid,
                    saga_id,
                    ConnectionStatus::Success,
                ))
                .await?;
            }

            // 3. Spawn children: persist all of them first, then dispatch
            let data = ctx.into_value();
            let mut spawned = Vec::with_capacity(def.children.len());
            for child_type in &def.children {
                spawned.push(self.spawn_child(&saga, *child_type, data.clone()).await?);
            }
            for (child, first_event) in spawned {
                let child_ctx = SagaContext::from_value(&child.saga_data);
                self.launch(&child, first_event, &child_ctx, alerts).await?;
            }
            Ok(())
        }
        .boxed()
    }

    async fn spawn_child(&self, parent: &Saga, child_type: SagaType, data: Value) -> Result<(Saga, Event)> {
        let child = Saga::child(
            parent.root_saga_uuid,
            parent.operation.clone(),
            child_type.as_str(),
            data,
        );
        let first_event = self.catalog.first_event(&child, child_type)?;

        self.store_call(self.store.create_saga(&child)).await?;
        self.store_call(self.store.create_event(&first_event)).await?;
        self.store_call(self.store.create_saga_connection(
            parent.saga_uuid,
            child.saga_uuid,
            ConnectionStatus::Waiting,
        ))
        .await?;

        tracing::info!(
            parent_id = %parent.saga_uuid,
            saga_id = %child.saga_uuid,
            saga_type = %child_type,
            "child saga created"
        );
        Ok((child, first_event))
    }

    fn on_event_failed<'a>(
        &'a self,
        saga_id: SagaId,
        alerts: &'a mut Vec<SagaError>,
    ) -> BoxFuture<'a, Result<()>> {
        async move {
            let saga = self.load_saga(saga_id).await?;
            if saga.saga_status.is_terminal() {
                return Ok(());
            }
            tracing::warn!(saga_id = %saga_id, saga_type = %saga.saga_type, "event failed, rolling back saga");
            self.enter_rollback(saga_id).await?;
            self.try_compensate(saga_id, alerts).await
        }
        .boxed()
    }

    async fn enter_rollback(&self, saga_id: SagaId) -> Result<()> {
        self.store_call(
            self.store
                .update_saga_status(saga_id, SagaStatus::FallBackInProcess),
        )
        .await?;
        metrics::counter!("saga_rollbacks_total").increment(1);
        Ok(())
    }

    /// Drives a completed saga (and its completed children) into rollback.
    fn request_rollback<'a>(
        &'a self,
        saga_id: SagaId,
        alerts: &'a mut Vec<SagaError>,
    ) -> BoxFuture<'a, Result<()>> {
        async move {
            let saga = self.load_saga(saga_id).await?;
            match saga.saga_status {
                SagaStatus::Completed => {
                    tracing::info!(saga_id = %saga_id, saga_type = %saga.saga_type, "rolling back completed saga");
                    self.enter_rollback(saga_id).await?;

                    let children = self
                        .store_call(self.store.get_connections_by_parent(saga_id))
                        .await?;
                    for connection in children
                        .iter()
                        .filter(|c| c.connection_status == ConnectionStatus::Success)
                    {
                        self.request_rollback(connection.next_saga_uuid, alerts)
                            .await?;
                    }
                }
                SagaStatus::FallBackInProcess => {}
                // Running sagas notice the rollback when their event completes.
                _ => return Ok(()),
            }
            self.try_compensate(saga_id, alerts).await
        }
        .boxed()
    }

    /// Takes the next rollback step of a saga in FallBackInProcess.
    ///
    /// Waits while a child is unresolved or an event is outstanding, then
    /// dispatches one compensating event or finalizes the saga.
    fn try_compensate<'a>(
        &'a self,
        saga_id: SagaId,
        alerts: &'a mut Vec<SagaError>,
    ) -> BoxFuture<'a, Result<()>> {
        async move {
            let saga = self.load_saga(saga_id).await?;
            if saga.saga_status != SagaStatus::FallBackInProcess {
                return Ok(());
            }

            let children = self
                .store_call(self.store.get_connections_by_parent(saga_id))
                .await?;
            if children
                .iter()
                .any(|c| !c.connection_status.is_rollback_resolved())
            {
                tracing::debug!(saga_id = %saga_id, "waiting for children to roll back");
                return Ok(());
            }

            let events = self.load_events(saga_id).await?;
            if saga_machine::active_event(&events).is_some() {
                return Ok(());
            }
            if events
                .iter()
                .any(|e| e.event_is_roll_back && e.event_status == EventStatus::FallBackError)
            {
                return self
                    .finalize(
                        saga_id,
                        SagaStatus::FallBackError,
                        ConnectionStatus::Failed,
                        alerts,
                    )
                    .await;
            }

            match saga_machine::next_compensation(&events, &self.catalog)? {
                CompensationStep::Dispatch { original, revert } => {
                    let ctx = self.context_for(&saga, &events)?;
                    let compensation = Event::compensating(saga_id, revert.as_str());
                    self.store_call(self.store.create_event(&compensation))
                        .await?;

                    if let Some(original) = events.iter().find(|e| e.event_uuid == original) {
                        let mut original = original.clone();
                        original.event_rollback_uuid = Some(compensation.event_uuid);
                        let status = original.event_status;
                        self.store_call(self.store.update_event(&original, status))
                            .await?;
                    }

                    tracing::info!(
                        saga_id = %saga_id,
                        event_id = %original,
                        compensation = %revert,
                        "compensating event"
                    );
                    self.launch(&saga, compensation, &ctx, alerts).await
                }
                CompensationStep::Gap {
                    original,
                    event_type,
                } => {
                    metrics::counter!("saga_compensation_gaps_total", "event_type" => event_type.as_str())
                        .increment(1);
                    tracing::error!(
                        saga_id = %saga_id,
                        event_id = %original,
                        event_type = %event_type,
                        "no compensating event defined, saga left in error"
                    );
                    self.finalize(saga_id, SagaStatus::Error, ConnectionStatus::Failed, alerts)
                        .await?;
                    alerts.push(SagaError::NoRevertEvent {
                        saga_id,
                        event_type: event_type.to_string(),
                    });
                    Ok(())
                }
                CompensationStep::Done => {
                    let child_failed = children
                        .iter()
                        .any(|c| c.connection_status == ConnectionStatus::Failed);
                    let status = if child_failed {
                        SagaStatus::FallBackError
                    } else {
                        saga_machine::rollback_outcome(&events)
                    };
                    let connection = if status == SagaStatus::FallBackError {
                        ConnectionStatus::Failed
                    } else {
                        ConnectionStatus::FallBack
                    };
                    self.finalize(saga_id, status, connection, alerts).await
                }
            }
        }
        .boxed()
    }

    /// Stores a terminal rollback status and hands the result to the parents.
    fn finalize<'a>(
        &'a self,
        saga_id: SagaId,
        status: SagaStatus,
        connection: ConnectionStatus,
        alerts: &'a mut Vec<SagaError>,
    ) -> BoxFuture<'a, Result<()>> {
        async move {
            self.store_call(self.store.update_saga_status(saga_id, status))
                .await?;
            let saga = self.load_saga(saga_id).await?;
            self.notify(&saga, status).await;
            tracing::info!(saga_id = %saga_id, saga_type = %saga.saga_type, status = %status, "saga resolved");

            let parents = self
                .store_call(self.store.get_connections_by_child(saga_id))
                .await?;
            for parent in parents {
                self.store_call(self.store.update_saga_connection(
                    parent.current_saga_uuid,
                    saga_id,
                    connection,
                ))
                .await?;
                self.request_rollback(parent.current_saga_uuid, alerts)
                    .await?;
            }
            Ok(())
        }
        .boxed()
    }

    async fn parent_rolling_back(&self, saga_id: SagaId) -> Result<bool> {
        let parents = self
            .store_call(self.store.get_connections_by_child(saga_id))
            .await?;
        for connection in parents {
            let parent = self.load_saga(connection.current_saga_uuid).await?;
            if parent.saga_status.is_rolling_back_or_failed() {
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn notify(&self, saga: &Saga, status: SagaStatus) {
        self.dispatcher
            .notify(SagaNotice {
                saga_uuid: saga.saga_uuid,
                root_saga_uuid: saga.root_saga_uuid,
                operation: saga.operation.clone(),
                saga_type: saga.saga_type.clone(),
                saga_status: status.to_string(),
            })
            .await;
    }

    async fn store_call<T>(
        &self,
        call: impl Future<Output = saga_store::Result<T>>,
    ) -> Result<T> {
        match tokio::time::timeout(self.config.store_timeout, call).await {
            Ok(result) => Ok(result?),
            Err(_) => {
                tracing::error!("store call timed out");
                Err(SagaError::StoreTimeout)
            }
        }
    }

    async fn load_saga(&self, saga_id: SagaId) -> Result<Saga> {
        self.store_call(self.store.get_saga(saga_id))
            .await?
            .ok_or(SagaError::SagaNotFound(saga_id))
    }

    async fn load_event(&self, event_id: EventId) -> Result<Event> {
        self.store_call(self.store.get_event(event_id))
            .await?
            .ok_or(SagaError::EventNotFound(event_id))
    }

    async fn load_events(&self, saga_id: SagaId) -> Result<Vec<Event>> {
        self.store_call(self.store.get_saga_events(saga_id)).await
    }
}

#[cfg(test)]
mod tests {
    use broker::{InMemoryBroker, RequestEnvelope};
    use saga_store::InMemorySagaStore;
    use serde_json::json;

    use super::*;

    fn setup() -> (
        Orchestrator<InMemorySagaStore, InMemoryBroker>,
        InMemorySagaStore,
        InMemoryBroker,
    ) {
        let store = InMemorySagaStore::new();
        let broker = InMemoryBroker::recording();
        let orchestrator =
            Orchestrator::banking(store.clone(), broker.clone(), OrchestratorConfig::default())
                .unwrap();
        (orchestrator, store, broker)
    }

    fn fields(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_start_operation_persists_and_dispatches() {
        let (orchestrator, store, broker) = setup();
        let saga_id = orchestrator
            .start_operation(
                Operation::CreateUser.code(),
                fields(json!({"login": "ann", "password": "pw", "email": "ann@example.com"})),
            )
            .await
            .unwrap();

        let saga = store.get_saga(saga_id).await.unwrap().unwrap();
        assert_eq!(saga.saga_status, SagaStatus::InProcess);
        assert_eq!(saga.event_uuids.len(), 1);

        let event = store.get_event(saga.event_uuids[0]).await.unwrap().unwrap();
        assert_eq!(event.event_status, EventStatus::InProgress);

        let published = broker.published_to(topics::USERS_REQUESTS).await;
        assert_eq!(published.len(), 1);
        let request = RequestEnvelope::decode(&published[0].payload).unwrap();
        assert_eq!(request.event_uuid, event.event_uuid);
        assert_eq!(request.operation_name, "create_user");
    }

    #[tokio::test]
    async fn test_input_errors_persist_nothing() {
        let (orchestrator, store, broker) = setup();

        let err = orchestrator
            .start_operation(42, fields(json!({})))
            .await
            .unwrap_err();
        assert!(matches!(err, SagaError::InvalidOperation(42)));

        let err = orchestrator
            .start_operation(
                Operation::AddAccount.code(),
                fields(json!({"user_id": "u-1"})),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, SagaError::InvalidOperationsData { .. }));

        assert_eq!(store.saga_count().await, 0);
        assert_eq!(broker.published_count().await, 0);
    }

    #[tokio::test]
    async fn test_reply_for_created_event_is_rejected() {
        let (orchestrator, store, _broker) = setup();
        let saga = Saga::root("create_user", "create_user", json!({}));
        let event = Event::new(saga.saga_uuid, "create_user");
        store.create_saga(&saga).await.unwrap();
        store.create_event(&event).await.unwrap();

        let err = orchestrator
            .reconcile(saga.saga_uuid, event.event_uuid, true, None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SagaError::InvalidEventStatus {
                status: EventStatus::Created,
                ..
            }
        ));
        let stored = store.get_event(event.event_uuid).await.unwrap().unwrap();
        assert_eq!(stored.event_status, EventStatus::Created);
    }

    #[tokio::test]
    async fn test_unknown_ids_are_not_found() {
        let (orchestrator, _store, _broker) = setup();
        let err = orchestrator
            .reconcile(SagaId::new(), EventId::new(), true, None)
            .await
            .unwrap_err();
        assert!(matches!(err, SagaError::SagaNotFound(_)));
        assert!(orchestrator.saga_view(SagaId::new()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_store_outage_is_retryable() {
        let (orchestrator, store, _broker) = setup();
        store.set_unavailable(true);

        let err = orchestrator
            .start_operation(
                Operation::GetUserData.code(),
                fields(json!({"user_id": "u-1"})),
            )
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }
}
