//! Common test utilities: stand-in transport programs.

use std::path::{Path, PathBuf};

/// Write an executable shell script that prints `output` and exits with `status`.
#[cfg(unix)]
pub fn fake_program(dir: &Path, name: &str, output: &[&str], status: i32) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let mut script = String::from("#!/bin/sh\n");
    for line in output {
        script.push_str(&format!("echo '{line}'\n"));
    }
    script.push_str(&format!("exit {status}\n"));

    let path = dir.join(name);
    std::fs::write(&path, script).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// A staging directory holding `count` small files.
pub fn staging_dir(root: &Path, name: &str, count: usize) -> PathBuf {
    let dir = root.join(name);
    std::fs::create_dir_all(&dir).unwrap();
    for i in 0..count {
        std::fs::write(dir.join(format!("HitSpool-{i}.dat")), vec![0u8; 64]).unwrap();
    }
    dir
}
