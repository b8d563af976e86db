// ============================================================================
// Domain Layer - Business Logic
// ============================================================================
//
// Aggregates and the rules that govern them. The order aggregate carries the
// lifecycle state machine; storage and orchestration live elsewhere.
//
// ============================================================================

pub mod order;
