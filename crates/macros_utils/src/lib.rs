//! Small declarative macros shared by the HTTP apps.

#[cfg(feature = "actix")]
#[doc(hidden)]
pub use actix_web as __actix;

/// Generate a `routes` function registering the listed handlers.
///
/// ```ignore
/// macros_utils::routes! {
///     route list_endpoints,
///     route create_endpoint,
/// }
/// ```
///
/// With a `scope` prefix the handlers are mounted below that path:
///
/// ```ignore
/// macros_utils::routes! {
///     scope "/endpoints",
///     route list_endpoints,
/// }
/// ```
#[cfg(feature = "actix")]
#[macro_export]
macro_rules! routes {
    (scope $path:literal, $(route $handler:ident),* $(,)?) => {
        pub fn routes(cfg: &mut $crate::__actix::web::ServiceConfig) {
            cfg.service(
                $crate::__actix::web::scope($path)
                    $(.service($handler))*
            );
        }
    };
    ($(route $handler:ident),* $(,)?) => {
        pub fn routes(cfg: &mut $crate::__actix::web::ServiceConfig) {
            $(cfg.service($handler);)*
        }
    };
}
