pub mod adapters;
pub mod api;
pub mod error;
pub mod locks;
pub mod models;
pub mod pg;
pub mod policy;
pub mod reconciliation;
pub mod remediation;
pub mod revenue;
pub mod scheduler;
pub mod state_machine;
pub mod store;

pub use adapters::{
    AdapterRegistry, HttpProcessorAdapter, ProcessorAdapter, ProcessorError, ProcessorStatus,
    ProviderRef,
};
pub use api::{routes as admin_routes, ActionResponse, RevenueResponse};
pub use error::{PayoutError, PayoutResult};
pub use locks::PaymentLocks;
pub use models::{
    BalanceAccount, BalanceState, NewPayment, Payment, PaymentComment, PaymentState,
    PaymentTransition, Processor, RefundRecord, SaleRecord, Seller,
};
pub use pg::PgPayoutStore;
pub use policy::PayoutPolicy;
pub use reconciliation::{start_reconciliation_worker, ReconciliationHandle, ReconciliationJob};
pub use remediation::remediation_for;
pub use revenue::{RevenueReconciler, RevenueSnapshot};
pub use scheduler::{
    process_tick as run_payout_sweep_tick, spawn as spawn_payout_scheduler, PayoutRun,
    PayoutScheduler, SkipReason, TickSummary,
};
pub use state_machine::{DisbursementStateMachine, TransitionOutcome};
pub use store::{MemoryPayoutStore, PayoutStore, StoreError, StoreResult};
