//! Helpers for enums that cross the API boundary as lowercase strings.

/// Implement `as_str`, `Display` and `FromStr` for a fieldless enum.
///
/// Parsing failures become [`DomainError::Validation`](crate::DomainError)
/// naming the rejected value and the accepted set.
///
/// ```ignore
/// impl_str_enum!(Severity, "severity", {
///     Critical => "critical",
///     Major => "major",
///     Minor => "minor",
/// });
/// ```
#[macro_export]
macro_rules! impl_str_enum {
    ($t:ty, $name:literal, { $($variant:ident => $s:literal),+ $(,)? }) => {
        impl $t {
            /// Stable lowercase wire name.
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $s,)+
                }
            }
        }

        impl ::core::fmt::Display for $t {
            fn fmt(&self, f: &mut ::core::fmt::Formatter<'_>) -> ::core::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl ::core::str::FromStr for $t {
            type Err = $crate::DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.trim().to_ascii_lowercase().as_str() {
                    $($s => Ok(Self::$variant),)+
                    other => Err($crate::DomainError::validation(format!(
                        "unknown {} '{}' (expected one of: {})",
                        $name,
                        other,
                        [$($s),+].join(", ")
                    ))),
                }
            }
        }
    };
}
