pub mod dispatch;
pub mod offers;
pub mod queue;
pub mod transitions;
