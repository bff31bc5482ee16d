/// Postgres object identifier.
///
/// The oid type is implemented as an unsigned four-byte integer.
///
/// <https://www.postgresql.org/docs/current/datatype-oid.html>
pub type Oid = u32;

/// Well known builtin type oids.
///
/// These are stable across server versions, everything else should be
/// resolved through [`TypeCache`][crate::catalog::TypeCache].
pub mod oid {
    use super::Oid;

    pub const BOOL: Oid = 16;
    pub const NAME: Oid = 19;
    pub const INT8: Oid = 20;
    pub const INT2: Oid = 21;
    pub const INT4: Oid = 23;
    pub const TEXT: Oid = 25;
    pub const OID: Oid = 26;
    pub const UNKNOWN: Oid = 705;
    pub const BPCHAR: Oid = 1042;
    pub const VARCHAR: Oid = 1043;
    pub const REGTYPE: Oid = 2206;
}

/// A type that have corresponding postgres oid.
pub trait PgType {
    /// The oid this type is sent as.
    const OID: Oid;

    /// Whether a column of type `oid` can be decoded into this type.
    fn accepts(oid: Oid) -> bool {
        oid == Self::OID
    }
}

macro_rules! pg_type {
    ($ty:ty, $oid:expr, [$($also:expr),*] $(, $doc:literal)? ) => {
        impl PgType for $ty {
            $(#[doc = $doc])?
            const OID: Oid = $oid;

            fn accepts(oid: Oid) -> bool {
                oid == $oid $(|| oid == $also)*
            }
        }
    };
    ($ty:ty, $oid:expr $(, $doc:literal)? ) => {
        impl PgType for $ty {
            $(#[doc = $doc])?
            const OID: Oid = $oid;
        }
    };
}

pg_type!(bool, oid::BOOL);
pg_type!(i64, oid::INT8, "`int8` ~18 digit integer, 8-byte storage");
pg_type!(i16, oid::INT2, "`int2` -32 thousand to 32 thousand, 2-byte storage");
pg_type!(i32, oid::INT4, "`int4` -2 billion to 2 billion integer, 4-byte storage");
pg_type!(u32, oid::OID, [oid::REGTYPE], "`oid` object identifier, 4-byte storage");
pg_type!(str, oid::TEXT, [oid::NAME, oid::BPCHAR, oid::VARCHAR, oid::UNKNOWN]);
pg_type!(String, oid::TEXT, [oid::NAME, oid::BPCHAR, oid::VARCHAR, oid::UNKNOWN]);
pg_type!(crate::common::ByteStr, oid::TEXT, [oid::NAME, oid::BPCHAR, oid::VARCHAR, oid::UNKNOWN]);

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn catalog_columns_accepted() {
        assert!(u32::accepts(oid::OID));
        assert!(String::accepts(oid::NAME));
        assert!(i16::accepts(oid::INT2));
        assert!(!i16::accepts(oid::INT4));
        assert!(!u32::accepts(oid::INT4));
    }
}
