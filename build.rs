extern crate pkg_config;
use std::error::Error;

fn main() -> Result<(), Box<dyn Error>> {
    // Invalidate the built crate whenever this file changes
    println!("cargo:rerun-if-changed=build.rs");

    if let Err(e) = pkg_config::Config::new().atleast_version("1.6").probe("dbus-1") {
        eprintln!("pkg_config failed: {}", e);
        eprintln!(
            "One possible solution is to check whether packages\n\
            'libdbus-1-dev' and 'pkg-config' are installed:\n\
            On Ubuntu:\n\
            sudo apt install libdbus-1-dev pkg-config\n\
            On Fedora:\n\
            sudo dnf install dbus-devel pkgconf-pkg-config\n"
        );
        panic!();
    }
    Ok(())
}
