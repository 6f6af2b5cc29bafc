/*!
 * Monitoring
 * Tracing subscriber setup for the memory core
 */

mod tracer;

pub use tracer::init_tracing;
