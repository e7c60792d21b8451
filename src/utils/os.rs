use super::platform::{Arch, Os, Platform};

/// Platform of the machine this process runs on, in normalized tokens.
pub fn current_platform() -> Platform {
    Platform {
        os: Os::normalize(std::env::consts::OS),
        arch: Arch::normalize(std::env::consts::ARCH),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[cfg(all(target_os = "linux", target_arch = "x86_64"))]
    fn linux_amd64_host() {
        assert_eq!(current_platform(), Platform::new(Os::LINUX, Arch::AMD64));
    }

    #[test]
    fn tokens_are_already_normalized() {
        let platform = current_platform();
        assert_eq!(Os::normalize(platform.os.as_str()), platform.os);
        assert_eq!(Arch::normalize(platform.arch.as_str()), platform.arch);
    }
}
