//! Locating the executor image relative to the harness install directory.

use std::path::{Path, PathBuf};

use super::ServiceError;

/// Architecture the executor image must match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arch {
    X64,
    X86,
    Other(&'static str),
}

impl Arch {
    pub fn current() -> Self {
        if cfg!(target_arch = "x86_64") {
            Arch::X64
        } else if cfg!(target_arch = "x86") {
            Arch::X86
        } else {
            Arch::Other(std::env::consts::ARCH)
        }
    }

    /// Image file name and the sibling directory used by side-by-side installs.
    fn image(self) -> Result<(&'static str, &'static str), ServiceError> {
        match self {
            Arch::X64 => Ok(("kfixkr64.sys", "amd64")),
            Arch::X86 => Ok(("kfixkr32.sys", "i386")),
            Arch::Other(name) => Err(ServiceError::UnsupportedArchitecture(name.to_string())),
        }
    }
}

/// Searches `<dir>/<image>` then `<dir>/../<arch dir>/<image>`.
#[derive(Debug, Clone)]
pub struct ExecutorLocator {
    base_dir: PathBuf,
    arch: Arch,
}

impl ExecutorLocator {
    pub fn new(base_dir: impl Into<PathBuf>, arch: Arch) -> Self {
        Self { base_dir: base_dir.into(), arch }
    }

    /// Search next to the running executable.
    pub fn from_current_exe() -> Result<Self, ServiceError> {
        let exe = std::env::current_exe()?;
        let dir = exe.parent().map(Path::to_path_buf).unwrap_or_default();
        Ok(Self::new(dir, Arch::current()))
    }

    pub fn candidates(&self) -> Result<Vec<PathBuf>, ServiceError> {
        let (image, arch_dir) = self.arch.image()?;
        Ok(vec![
            self.base_dir.join(image),
            self.base_dir.join("..").join(arch_dir).join(image),
        ])
    }

    pub fn locate(&self) -> Result<PathBuf, ServiceError> {
        let candidates = self.candidates()?;
        match candidates.iter().find(|p| p.is_file()) {
            Some(found) => Ok(found.clone()),
            None => Err(ServiceError::ExecutorImageNotFound(candidates)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefers_own_directory() {
        let dir = tempfile::tempdir().unwrap();
        let bin = dir.path().join("bin");
        std::fs::create_dir_all(&bin).unwrap();
        std::fs::write(bin.join("kfixkr64.sys"), b"image").unwrap();

        let found = ExecutorLocator::new(&bin, Arch::X64).locate().unwrap();
        assert_eq!(found, bin.join("kfixkr64.sys"));
    }

    #[test]
    fn test_falls_back_to_arch_directory() {
        let dir = tempfile::tempdir().unwrap();
        let bin = dir.path().join("bin");
        let i386 = dir.path().join("i386");
        std::fs::create_dir_all(&bin).unwrap();
        std::fs::create_dir_all(&i386).unwrap();
        std::fs::write(i386.join("kfixkr32.sys"), b"image").unwrap();

        let found = ExecutorLocator::new(&bin, Arch::X86).locate().unwrap();
        assert!(found.ends_with("kfixkr32.sys"));
        assert!(found.is_file());
    }

    #[test]
    fn test_missing_image_lists_candidates() {
        let dir = tempfile::tempdir().unwrap();
        match ExecutorLocator::new(dir.path(), Arch::X64).locate() {
            Err(ServiceError::ExecutorImageNotFound(searched)) => assert_eq!(searched.len(), 2),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_unsupported_arch() {
        let err = ExecutorLocator::new(".", Arch::Other("riscv64")).locate().unwrap_err();
        assert!(matches!(err, ServiceError::UnsupportedArchitecture(_)));
    }
}
