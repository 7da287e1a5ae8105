/// Execute an aggregate command deterministically (no IO).
///
/// 1. **Decide**: `aggregate.handle(command)` (pure, no mutation)
/// 2. **Evolve**: applies each event via `aggregate.apply(event)`
///
/// Use this only for commands whose events move no stock. Commands that post
/// `StockMove`s go through the ledger first so the document and the ledger change
/// together.
pub fn execute<A>(aggregate: &mut A, command: &A::Command) -> Result<Vec<A::Event>, A::Error>
where
    A: stockledger_core::Aggregate,
{
    let events = A::handle(aggregate, command)?;
    for ev in &events {
        A::apply(aggregate, ev);
    }
    Ok(events)
}
