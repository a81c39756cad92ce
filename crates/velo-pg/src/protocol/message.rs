//! Backend message model.

use bytes::Bytes;

/// One decoded backend frame.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendMessage {
    /// Authentication request or acknowledgment ('R')
    Authentication(AuthRequest),
    /// Run-time parameter report ('S')
    ParameterStatus {
        name:  String,
        value: String,
    },
    /// Cancellation key data ('K')
    BackendKeyData {
        process_id: i32,
        secret_key: i32,
    },
    /// Backend is ready for the next query ('Z'); status is `I`, `T` or `E`
    ReadyForQuery {
        status: u8,
    },
    /// Result column descriptors ('T')
    RowDescription(Vec<FieldDescription>),
    /// One result row ('D'); `None` columns are SQL NULL
    DataRow(Vec<Option<Bytes>>),
    /// Statement finished ('C')
    CommandComplete {
        tag: String,
    },
    /// Statement failed ('E'); the connection stays usable after the
    /// following ReadyForQuery
    ErrorResponse(ErrorFields),
    /// Warning ('N')
    NoticeResponse(ErrorFields),
    /// Parse acknowledged ('1')
    ParseComplete,
    /// Bind acknowledged ('2')
    BindComplete,
    /// Close acknowledged ('3')
    CloseComplete,
    /// Describe of a statement that returns no rows ('n')
    NoData,
    /// Empty query string ('I')
    EmptyQueryResponse,
    /// Declared parameter types of a described statement ('t')
    ParameterDescription(Vec<u32>),
    /// Row limit reached on Execute ('s')
    PortalSuspended,
}

/// Decoded authentication request ('R') subtypes.
#[derive(Debug, Clone, PartialEq)]
pub enum AuthRequest {
    /// Authentication succeeded
    Ok,
    /// Server wants the password in cleartext
    CleartextPassword,
    /// Server wants an MD5-hashed password (not supported)
    Md5Password,
    /// Server starts SASL; lists acceptable mechanisms
    Sasl {
        mechanisms: Vec<String>,
    },
    /// SASL challenge
    SaslContinue {
        data: Bytes,
    },
    /// SASL outcome (server signature)
    SaslFinal {
        data: Bytes,
    },
    /// Any other authentication scheme, by code
    Other(i32),
}

/// Error and notice fields the client cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorFields {
    /// Severity string, e.g. `ERROR`, `FATAL`, `WARNING`
    pub severity: String,
    /// SQLSTATE code, e.g. `23505`
    pub code:     String,
    /// Primary human-readable message
    pub message:  String,
    /// Optional detail
    pub detail:   Option<String>,
}

/// One column descriptor from a RowDescription frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDescription {
    /// Column name
    pub name:          String,
    /// Originating table OID, 0 if not a simple column reference
    pub table_oid:     u32,
    /// Attribute number in the originating table
    pub column_attr:   i16,
    /// Type OID of the column
    pub type_oid:      u32,
    /// Declared type size (negative for variable-width)
    pub type_size:     i16,
    /// Type modifier
    pub type_modifier: i32,
    /// Wire format of the column in subsequent DataRow frames
    pub format:        i16,
}
