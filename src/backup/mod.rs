pub mod app_config;
pub mod cancel;
pub mod capture;
pub mod compress;
pub mod file_ext;
pub mod finish;
#[cfg(test)]
pub(crate) mod http_stub;
pub mod notifications;
pub mod pipeline;
pub mod redacted;
pub mod registry;
pub mod result_error;
pub mod transport;
pub mod validate;

macro_rules! function_path {
    () => {
        concat!(module_path!(), "::", function_name!(), " ", file!(), ":", line!())
    };
}

pub(crate) use function_path;
