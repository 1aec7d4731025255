pub mod archive;
pub mod backup_config;
pub mod compress;
pub mod detect;
pub mod file_filter;
pub mod maker;
pub mod path_class;
pub mod result_error;
pub mod retention;
pub mod scheduler;
pub mod store;
pub mod task;
pub mod validate;
pub mod watch;

macro_rules! function_path {
    () => {
        concat!(module_path!(), "::", function_name!(), " ", file!(), ":", line!())
    };
}

pub(crate) use function_path;
