/// Declare a `Copy` newtype over a primitive identifier.
///
/// The wrapper derefs to the inner value, converts both ways with `From`,
/// orders and hashes like the inner value, and serializes transparently.
/// `Debug` prints `Name(value)`, `Display` prints the bare value.
#[macro_export]
macro_rules! strong_type {
    ($name:ident, $inner:ty) => {
        #[derive(
            Clone,
            Copy,
            PartialEq,
            Eq,
            Hash,
            PartialOrd,
            Ord,
            Default,
            serde::Serialize,
            serde::Deserialize,
        )]
        #[serde(transparent)]
        #[repr(transparent)]
        pub struct $name(pub $inner);

        impl ::std::ops::Deref for $name {
            type Target = $inner;

            #[inline]
            fn deref(&self) -> &Self::Target {
                &self.0
            }
        }

        impl ::std::fmt::Debug for $name {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }

        impl ::std::fmt::Display for $name {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<$inner> for $name {
            #[inline]
            fn from(val: $inner) -> Self {
                Self(val)
            }
        }

        impl From<$name> for $inner {
            #[inline]
            fn from(val: $name) -> Self {
                val.0
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    strong_type!(SampleId, u64);

    #[test]
    fn test_strong_type_conversions() {
        let id: SampleId = 100u64.into();
        assert_eq!(*id, 100);
        let raw: u64 = id.into();
        assert_eq!(raw, 100);
        assert_eq!(SampleId::default(), SampleId(0));
    }

    #[test]
    fn test_strong_type_formatting() {
        let id = SampleId(7);
        assert_eq!(id.to_string(), "7");
        assert_eq!(format!("{:?}", id), "SampleId(7)");
    }

    #[test]
    fn test_strong_type_ordering() {
        let set: BTreeSet<_> = [SampleId(3), SampleId(1), SampleId(2), SampleId(1)]
            .into_iter()
            .collect();
        assert_eq!(set.into_iter().collect::<Vec<_>>(), vec![SampleId(1), SampleId(2), SampleId(3)]);
    }

    #[test]
    fn test_strong_type_serde() {
        let json = serde_json::to_string(&SampleId(42)).unwrap();
        assert_eq!(json, "42");
        let parsed: SampleId = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, SampleId(42));
    }
}
