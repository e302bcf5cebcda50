//! Value types of column families and the row-key schema of a table.

use crate::proto::admin::r#type::{self as pb, Kind};
use crate::proto::admin::Type;

/// The type of the values stored in a column family, or of one component of a row key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueType {
    /// Arbitrary bytes.
    Bytes,
    /// UTF-8 text.
    String,
    /// A signed 64-bit integer.
    Int64(Int64Encoding),
    /// A 32-bit float.
    Float32,
    /// A 64-bit float.
    Float64,
    /// A boolean.
    Bool,
    /// A point in time.
    Timestamp,
    /// A calendar date.
    Date,
    /// A value the server combines on write.
    Aggregate {
        /// The type of the values written.
        input: Box<ValueType>,
        /// How written values are combined.
        aggregator: Aggregator,
    },
    /// A sequence of named fields.
    Struct(StructType),
}

/// How an `Int64` is laid out in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Int64Encoding {
    /// Eight bytes, most significant first.
    #[default]
    BigEndianBytes,
    /// An order-preserving variable-length encoding.
    OrderedCodeBytes,
}

/// The combining function of an aggregate family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aggregator {
    /// Add the inputs.
    Sum,
    /// Keep the smallest input.
    Min,
    /// Keep the largest input.
    Max,
    /// Approximate the number of distinct inputs.
    HllppUniqueCount,
}

/// A structured type, used as the schema of a row key.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StructType {
    /// The fields, in order.
    pub fields: Vec<StructField>,
    /// How the fields are combined into a single byte string.
    pub encoding: Option<StructEncoding>,
}

/// One field of a [`StructType`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructField {
    /// The field name.
    pub name: String,
    /// The field type.
    pub value_type: ValueType,
}

/// How the fields of a [`StructType`] are encoded together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StructEncoding {
    /// The struct has exactly one field, encoded on its own.
    Singleton,
    /// Fields are joined by the given delimiter.
    DelimitedBytes(Vec<u8>),
    /// Fields are encoded so that byte order matches field order.
    OrderedCodeBytes,
}

impl ValueType {
    /// An aggregate of 64-bit integers.
    #[must_use]
    pub fn int64_aggregate(aggregator: Aggregator) -> Self {
        Self::Aggregate {
            input: Box::new(Self::Int64(Int64Encoding::BigEndianBytes)),
            aggregator,
        }
    }

    /// The wire representation.
    #[must_use]
    pub fn to_proto(&self) -> Type {
        let kind = match self {
            Self::Bytes => Kind::BytesType(pb::Bytes {}),
            Self::String => Kind::StringType(pb::String {}),
            Self::Int64(encoding) => Kind::Int64Type(pb::Int64 {
                encoding: Some(pb::int64::Encoding {
                    encoding: Some(match encoding {
                        Int64Encoding::BigEndianBytes => pb::int64::encoding::Encoding::BigEndianBytes(
                            pb::int64::encoding::BigEndianBytes {},
                        ),
                        Int64Encoding::OrderedCodeBytes => {
                            pb::int64::encoding::Encoding::OrderedCodeBytes(
                                pb::int64::encoding::OrderedCodeBytes {},
                            )
                        }
                    }),
                }),
            }),
            Self::Float32 => Kind::Float32Type(pb::Float32 {}),
            Self::Float64 => Kind::Float64Type(pb::Float64 {}),
            Self::Bool => Kind::BoolType(pb::Bool {}),
            Self::Timestamp => Kind::TimestampType(pb::Timestamp {}),
            Self::Date => Kind::DateType(pb::Date {}),
            Self::Aggregate { input, aggregator } => {
                let aggregator = match aggregator {
                    Aggregator::Sum => pb::aggregate::Aggregator::Sum(pb::aggregate::Sum {}),
                    Aggregator::Min => pb::aggregate::Aggregator::Min(pb::aggregate::Min {}),
                    Aggregator::Max => pb::aggregate::Aggregator::Max(pb::aggregate::Max {}),
                    Aggregator::HllppUniqueCount => pb::aggregate::Aggregator::HllppUniqueCount(
                        pb::aggregate::HyperLogLogPlusPlusUniqueCount {},
                    ),
                };
                Kind::AggregateType(
                    pb::Aggregate {
                        input_type: Some(input.to_proto().into()),
                        state_type: None,
                        aggregator: Some(aggregator),
                    }
                    .into(),
                )
            }
            Self::Struct(struct_type) => Kind::StructType(struct_type.to_proto()),
        };
        Type { kind: Some(kind) }
    }

    /// Interpret a type received from the server. Returns `None` if no kind is set.
    #[must_use]
    pub fn from_proto(value_type: &Type) -> Option<Self> {
        Some(match value_type.kind.as_ref()? {
            Kind::BytesType(_) => Self::Bytes,
            Kind::StringType(_) => Self::String,
            Kind::Int64Type(int64) => Self::Int64(
                match int64.encoding.as_ref().and_then(|e| e.encoding.as_ref()) {
                    Some(pb::int64::encoding::Encoding::OrderedCodeBytes(_)) => {
                        Int64Encoding::OrderedCodeBytes
                    }
                    _ => Int64Encoding::BigEndianBytes,
                },
            ),
            Kind::Float32Type(_) => Self::Float32,
            Kind::Float64Type(_) => Self::Float64,
            Kind::BoolType(_) => Self::Bool,
            Kind::TimestampType(_) => Self::Timestamp,
            Kind::DateType(_) => Self::Date,
            Kind::AggregateType(aggregate) => {
                #[allow(clippy::redundant_closure)] // the field may be boxed
                let input = aggregate
                    .input_type
                    .as_ref()
                    .and_then(|t| Self::from_proto(t))
                    .unwrap_or(Self::Int64(Int64Encoding::BigEndianBytes));
                let aggregator = match aggregate.aggregator.as_ref()? {
                    pb::aggregate::Aggregator::Sum(_) => Aggregator::Sum,
                    pb::aggregate::Aggregator::Min(_) => Aggregator::Min,
                    pb::aggregate::Aggregator::Max(_) => Aggregator::Max,
                    pb::aggregate::Aggregator::HllppUniqueCount(_) => Aggregator::HllppUniqueCount,
                };
                Self::Aggregate {
                    input: Box::new(input),
                    aggregator,
                }
            }
            Kind::StructType(struct_type) => Self::Struct(StructType::from_proto(struct_type)),
        })
    }
}

impl StructType {
    /// A struct with the given fields and no explicit encoding.
    #[must_use]
    pub fn new(fields: impl IntoIterator<Item = StructField>) -> Self {
        Self {
            fields: fields.into_iter().collect(),
            encoding: None,
        }
    }

    /// Set the encoding.
    #[must_use]
    pub fn with_encoding(mut self, encoding: StructEncoding) -> Self {
        self.encoding = Some(encoding);
        self
    }

    /// The wire representation.
    #[must_use]
    pub fn to_proto(&self) -> pb::Struct {
        use pb::r#struct::encoding::{self, Encoding};

        pb::Struct {
            fields: self
                .fields
                .iter()
                .map(|field| pb::r#struct::Field {
                    field_name: field.name.clone(),
                    r#type: Some(field.value_type.to_proto().into()),
                })
                .collect(),
            encoding: self.encoding.as_ref().map(|e| pb::r#struct::Encoding {
                encoding: Some(match e {
                    StructEncoding::Singleton => Encoding::Singleton(encoding::Singleton {}),
                    StructEncoding::DelimitedBytes(delimiter) => {
                        Encoding::DelimitedBytes(encoding::DelimitedBytes {
                            delimiter: delimiter.clone(),
                        })
                    }
                    StructEncoding::OrderedCodeBytes => {
                        Encoding::OrderedCodeBytes(encoding::OrderedCodeBytes {})
                    }
                }),
            }),
        }
    }

    /// Interpret a struct received from the server. Fields without a type are read as bytes.
    #[must_use]
    pub fn from_proto(struct_type: &pb::Struct) -> Self {
        use pb::r#struct::encoding::Encoding;

        #[allow(clippy::redundant_closure)] // the field may be boxed
        let fields = struct_type
            .fields
            .iter()
            .map(|field| StructField {
                name: field.field_name.clone(),
                value_type: field
                    .r#type
                    .as_ref()
                    .and_then(|t| ValueType::from_proto(t))
                    .unwrap_or(ValueType::Bytes),
            })
            .collect();
        let encoding = struct_type
            .encoding
            .as_ref()
            .and_then(|e| e.encoding.as_ref())
            .map(|e| match e {
                Encoding::Singleton(_) => StructEncoding::Singleton,
                Encoding::DelimitedBytes(d) => StructEncoding::DelimitedBytes(d.delimiter.clone()),
                Encoding::OrderedCodeBytes(_) => StructEncoding::OrderedCodeBytes,
            });
        Self { fields, encoding }
    }
}

impl StructField {
    /// A field of the given name and type.
    #[must_use]
    pub fn new(name: impl Into<String>, value_type: ValueType) -> Self {
        Self {
            name: name.into(),
            value_type,
        }
    }
}
