//! Small declarative helpers shared by the HTTP binaries.

#[cfg(feature = "actix")]
#[doc(hidden)]
pub use actix_web as __actix_web;

/// Generates `pub fn routes(cfg: &mut ServiceConfig)` registering every listed
/// handler, in order.
///
/// ```ignore
/// macros_utils::routes! {
///     route list_jobs,
///     route create_job,
/// }
/// ```
#[cfg(feature = "actix")]
#[macro_export]
macro_rules! routes {
    ($(route $handler:ident),* $(,)?) => {
        pub fn routes(cfg: &mut $crate::__actix_web::web::ServiceConfig) {
            $( cfg.service($handler); )*
        }
    };
}
