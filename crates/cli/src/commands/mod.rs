pub mod config_cmd;
pub mod decide;
pub mod inspect;
