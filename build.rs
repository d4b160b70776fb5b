use std::io::ErrorKind;
use std::path::Path;
use std::{fs, io};

fn main() -> io::Result<()> {
    build_proto()?;
    Ok(())
}

fn build_proto() -> io::Result<()> {
    idempotent_create_dir("./generated/")?;
    match tonic_build::configure()
        .out_dir("./generated/")
        .compile(&["./protos/pbkv.proto"], &["./protos/"])
    {
        Ok(()) => Ok(()),
        // `protoc` is not installed. Fall back to the checked-in
        // ./generated/pbkv.rs so the crate still builds.
        Err(e)
            if e.kind() == ErrorKind::NotFound
                && Path::new("./generated/pbkv.rs").exists() =>
        {
            println!(
                "cargo:warning=protoc not found; using checked-in generated/pbkv.rs ({e})"
            );
            Ok(())
        }
        Err(e) => Err(e),
    }
}

fn idempotent_create_dir<P: AsRef<Path>>(path: P) -> io::Result<()> {
    match fs::create_dir(path) {
        Ok(_) => Ok(()),
        Err(e) => match e.kind() {
            ErrorKind::AlreadyExists => Ok(()),
            _ => Err(e),
        },
    }
}
