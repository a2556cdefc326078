pub mod bank_reader;
