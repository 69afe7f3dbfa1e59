pub mod broker_cmd;
