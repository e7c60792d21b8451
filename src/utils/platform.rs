use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;

/// Operating system token, always stored case-folded.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct Os(Cow<'static, str>);

impl Os {
    pub const LINUX: Os = Os(Cow::Borrowed("linux"));
    pub const WINDOWS: Os = Os(Cow::Borrowed("windows"));
    /// Linux containers hosted on a Windows daemon.
    pub const LCOW: Os = Os(Cow::Borrowed("lcow"));

    pub fn normalize(os: &str) -> Self {
        match os.to_lowercase().as_str() {
            "linux" => Self::LINUX,
            "windows" => Self::WINDOWS,
            "lcow" => Self::LCOW,
            other => Os(Cow::Owned(other.to_string())),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// CPU architecture token, case-folded with the common aliases collapsed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct Arch(Cow<'static, str>);

impl Arch {
    pub const AMD64: Arch = Arch(Cow::Borrowed("amd64"));
    pub const ARM: Arch = Arch(Cow::Borrowed("arm"));
    pub const ARM64: Arch = Arch(Cow::Borrowed("arm64"));
    pub const PPC64LE: Arch = Arch(Cow::Borrowed("ppc64le"));
    pub const S390X: Arch = Arch(Cow::Borrowed("s390x"));

    pub fn normalize(arch: &str) -> Self {
        match arch.to_lowercase().as_str() {
            "amd64" | "x86_64" | "x86-64" => Self::AMD64,
            "arm64" | "aarch64" => Self::ARM64,
            "arm" | "armhf" | "armel" => Self::ARM,
            "ppc64le" => Self::PPC64LE,
            "s390x" => Self::S390X,
            other => Arch(Cow::Owned(other.to_string())),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

macro_rules! token_conversions {
    ($ty:ident) => {
        impl From<&str> for $ty {
            fn from(s: &str) -> Self {
                $ty::normalize(s)
            }
        }

        impl From<String> for $ty {
            fn from(s: String) -> Self {
                $ty::normalize(&s)
            }
        }

        impl From<$ty> for String {
            fn from(token: $ty) -> Self {
                token.0.into_owned()
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

token_conversions!(Os);
token_conversions!(Arch);

/// An OS / CPU architecture pair
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Platform {
    pub os: Os,
    pub arch: Arch,
}

impl Platform {
    pub fn new(os: impl Into<Os>, arch: impl Into<Arch>) -> Self {
        Self {
            os: os.into(),
            arch: arch.into(),
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.arch.is_empty() {
            write!(f, "{}", self.os)
        } else {
            write!(f, "{}/{}", self.os, self.arch)
        }
    }
}

/// Accepts `os/arch` or a bare `os`. Never fails: unknown tokens are kept.
impl FromStr for Platform {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.split_once('/') {
            Some((os, arch)) => Platform::new(os, arch),
            None => Platform::new(s, ""),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arch_aliases_collapse() {
        assert_eq!(Arch::normalize("x86_64"), Arch::AMD64);
        assert_eq!(Arch::normalize("X86-64"), Arch::AMD64);
        assert_eq!(Arch::normalize("aarch64"), Arch::ARM64);
        assert_eq!(Arch::normalize("armhf"), Arch::ARM);
        assert_eq!(Arch::normalize("armel"), Arch::ARM);
        assert_eq!(Arch::normalize("S390X"), Arch::S390X);
    }

    #[test]
    fn unknown_tokens_pass_through_case_folded() {
        assert_eq!(Arch::normalize("RISCV64").as_str(), "riscv64");
        assert_eq!(Os::normalize("FreeBSD").as_str(), "freebsd");
        assert_eq!(Os::normalize("Windows"), Os::WINDOWS);
    }

    #[test]
    fn normalization_is_idempotent() {
        for raw in ["x86_64", "aarch64", "armhf", "Mips", ""] {
            let once = Arch::normalize(raw);
            assert_eq!(Arch::normalize(once.as_str()), once);
        }
        for raw in ["LINUX", "Darwin", "lcow"] {
            let once = Os::normalize(raw);
            assert_eq!(Os::normalize(once.as_str()), once);
        }
    }

    #[test]
    fn platform_equality_is_structural() {
        assert_eq!(
            Platform::new("Linux", "x86_64"),
            Platform::new(Os::LINUX, Arch::AMD64)
        );
        assert_ne!(
            Platform::new("linux", "arm"),
            Platform::new("linux", "arm64")
        );
    }

    #[test]
    fn platform_text_form() {
        let p: Platform = "windows/x86_64".parse().unwrap();
        assert_eq!(p, Platform::new(Os::WINDOWS, Arch::AMD64));
        assert_eq!(p.to_string(), "windows/amd64");

        let bare: Platform = "lcow".parse().unwrap();
        assert_eq!(bare.os, Os::LCOW);
        assert!(bare.arch.is_empty());
        assert_eq!(bare.to_string(), "lcow");
    }

    #[test]
    fn json_normalizes_on_decode() {
        let p: Platform = serde_json::from_str(r#"{"os":"Linux","arch":"aarch64"}"#).unwrap();
        assert_eq!(p, Platform::new(Os::LINUX, Arch::ARM64));
        assert_eq!(
            serde_json::to_string(&p).unwrap(),
            r#"{"os":"linux","arch":"arm64"}"#
        );
    }
}
