pub mod attempt_writer;
pub mod event_reader;
