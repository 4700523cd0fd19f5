/// What a stage does when `process` fails on one input
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorPolicy {
    /// Stop the stage and surface the error through its task handle
    Propagate,

    /// Log, count, drop the offending input and keep going
    #[default]
    SkipInput,
}
