pub mod ast;
pub mod evolution_engine;
pub mod hall_of_fame;
pub mod member;
pub mod migration;
pub mod operators;
pub mod population;
pub mod statistics;

pub use ast::Node;
pub use evolution_engine::{CycleJob, CycleOutcome, CycleRecord, RegularizedEvolution, SearchCycle};
pub use hall_of_fame::HallOfFame;
pub use member::PopMember;
pub use migration::migrate;
pub use population::Population;
pub use statistics::RunningSearchStatistics;
