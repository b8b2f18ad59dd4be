// Consumer side of the pipeline: type coercion, record shaping and CSV persistence.
pub mod coercion;
pub mod consumer;
pub mod record;
pub mod sink;
