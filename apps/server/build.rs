use std::env::vars;

use dotenvy::dotenv;

/// Bake `PULSE_*` values (except the secret) from `.env` in as compile-time
/// defaults; the runtime environment still overrides them.
fn main() {
    dotenv().ok();
    println!("cargo:rerun-if-changed=.env");

    for (k, v) in vars().filter(|(k, _)| k.starts_with("PULSE_") && k != "PULSE_SECRET_KEY") {
        println!("cargo:rustc-env={k}={v}");
    }
}
