/// Execute an aggregate command in place: decide, then apply each resulting event.
///
/// No IO, no persistence. Tests and benchmarks use this; production paths go through
/// the infrastructure command dispatcher.
pub fn execute<A>(aggregate: &mut A, command: &A::Command) -> Result<Vec<A::Event>, A::Error>
where
    A: loomerp_core::Aggregate,
{
    let events = A::handle(aggregate, command)?;
    for ev in &events {
        A::apply(aggregate, ev);
    }
    Ok(events)
}
