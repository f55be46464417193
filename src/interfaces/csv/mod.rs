pub mod command_reader;
pub mod step_writer;
