pub mod backup_config;
pub mod compress;
pub mod enumerate;
pub mod file_ext;
pub mod finish;
pub mod orchestrator;
pub mod progress;
pub mod redacted;
pub mod report;
pub mod result_error;
pub mod schedule;
pub mod stage;
pub mod tar;
pub mod upload;
pub mod validate;

macro_rules! function_path {
    () => {
        concat!(module_path!(), "::", function_name!(), " ", file!(), ":", line!())
    };
}

pub(crate) use function_path;
