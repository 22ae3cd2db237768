/// Postgres object identifier.
///
/// The oid type is implemented as an unsigned four-byte integer.
///
/// <https://www.postgresql.org/docs/current/datatype-oid.html>
pub type Oid = u32;

/// Builtin type oids.
pub mod oid {
    use super::Oid;

    /// Unspecified, lets the server infer the parameter type.
    pub const UNSPECIFIED: Oid = 0;
    pub const BOOL: Oid = 16;
    pub const BYTEA: Oid = 17;
    pub const CHAR: Oid = 18;
    pub const NAME: Oid = 19;
    pub const INT8: Oid = 20;
    pub const INT2: Oid = 21;
    pub const INT4: Oid = 23;
    pub const TEXT: Oid = 25;
    pub const OID: Oid = 26;
    pub const TID: Oid = 27;
    pub const XID: Oid = 28;
    pub const CID: Oid = 29;
    pub const FLOAT4: Oid = 700;
    pub const FLOAT8: Oid = 701;
    pub const UNKNOWN: Oid = 705;
    pub const BPCHAR: Oid = 1042;
    pub const VARCHAR: Oid = 1043;
}

/// A type that have corresponding postgres oid.
pub trait PgType {
    const OID: Oid;
}

macro_rules! oid {
    ($ty:ty, $oid:expr $(, $doc:literal)? ) => {
        impl PgType for $ty {
            $(#[doc = $doc])?
            const OID: Oid = $oid;
        }
    };
}

oid!(bool, oid::BOOL);
oid!(i64, oid::INT8, "`int8` ~18 digit integer, 8-byte storage");
oid!(i16, oid::INT2, "`int2` -32 thousand to 32 thousand, 2-byte storage");
oid!(i32, oid::INT4, "`int4` -2 billion to 2 billion integer, 4-byte storage");
oid!(u32, oid::OID, "`oid` object identifier, 4-byte storage");
oid!(&str, oid::TEXT, "`text` variable-length string, no limit specified");
oid!(String, oid::TEXT, "`text` variable-length string, no limit specified");
oid!(&[u8], oid::BYTEA, "`bytea` variable-length binary string");
oid!(Vec<u8>, oid::BYTEA, "`bytea` variable-length binary string");
oid!(f32, oid::FLOAT4, "`float4` single-precision floating point number, 4-byte storage");
oid!(f64, oid::FLOAT8, "`float8` double-precision floating point number, 8-byte storage");

impl<T: PgType> PgType for Option<T> {
    const OID: Oid = T::OID;
}
