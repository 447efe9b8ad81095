pub mod answer;
pub mod exam_session;
pub mod offline_period;
pub mod question;
pub mod quiz;
pub mod security_event;
pub mod strictness;
