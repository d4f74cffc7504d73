//! Build script for sonde-core
//!
//! This script checks system requirements before compilation:
//! - Minimum Rust version (`Option::is_some_and` needs 1.70+)
//! - Platform support (the live backend is Linux-only)
//!
//! ## Requirements
//!
//! - **Rust**: 1.70.0 or newer
//! - **Linux**: ptrace, `process_vm_readv(2)` (kernel 3.2+)
//! - **Other Unix**: builds, but only the frozen (snapshot) backend is available

fn main()
{
    match rustc_version::version() {
        Ok(found) => {
            let minimum = rustc_version::Version::new(1, 70, 0);
            if found < minimum {
                println!("cargo:warning=sonde-core expects Rust {minimum} or newer, found {found}");
            }
        }
        Err(_) => println!("cargo:warning=could not verify Rust version"),
    }

    if std::env::var("CARGO_CFG_TARGET_OS").as_deref() != Ok("linux") {
        println!("cargo:warning=sonde-core live process backend is only available on Linux");
    }
}
