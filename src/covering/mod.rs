//! Rule discovery: covering, pre-goal tracking and specialisation.

pub mod generalizer;
pub mod pregoal;
pub mod specializer;

pub use generalizer::{CoverOutcome, Generalizer, ValidActions};
pub use pregoal::{PreGoalInformation, PreGoalState, PreGoalTracker};
pub use specializer::{specialise, specialize_toward_pregoal, specialize_with_action_conditions};
