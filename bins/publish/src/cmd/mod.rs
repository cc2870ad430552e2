pub mod connector;
pub mod publish;
