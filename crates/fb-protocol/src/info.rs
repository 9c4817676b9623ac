//! Information request items and response parsing.
//!
//! Info responses are a sequence of `item u8, length u16le, value` clusters
//! terminated by `isc_info_end`. Integers inside a cluster are little-endian
//! of variable width. When the response did not fit into the requested
//! buffer the server ends it with `isc_info_truncated` instead.
//!
//! Statement describe responses nest variable descriptions between
//! `isc_info_sql_describe_vars` and `isc_info_sql_describe_end` (the latter
//! carries no length). A truncated describe is continued by asking again
//! with `isc_info_sql_sqlda_start` set to the first missing variable.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::consts::{info, sql_info, stmt_type};
use crate::error::ProtocolError;
use crate::types::TypeDescriptor;
use crate::xdr;

/// Items requested after attaching to a database.
pub const DATABASE_INFO_ITEMS: &[u8] = &[
    info::DB_SQL_DIALECT,
    info::ODS_VERSION,
    info::ODS_MINOR_VERSION,
    info::ISC_VERSION,
    info::END,
];

const VARIABLE_ITEMS: &[u8] = &[
    sql_info::SQLDA_SEQ,
    sql_info::TYPE,
    sql_info::SUB_TYPE,
    sql_info::SCALE,
    sql_info::LENGTH,
    sql_info::FIELD,
    sql_info::ALIAS,
    sql_info::RELATION,
    sql_info::RELATION_ALIAS,
    sql_info::OWNER,
    sql_info::DESCRIBE_END,
];

/// Items sent with `op_prepare_statement` to describe the statement.
#[must_use]
pub fn describe_items() -> Bytes {
    let mut items = BytesMut::with_capacity(2 * VARIABLE_ITEMS.len() + 6);
    items.put_u8(sql_info::STMT_TYPE);
    put_section_items(&mut items, sql_info::SELECT);
    put_section_items(&mut items, sql_info::BIND);
    items.freeze()
}

fn put_section_items(dst: &mut BytesMut, section: u8) {
    dst.put_u8(section);
    dst.put_u8(sql_info::DESCRIBE_VARS);
    dst.put_slice(VARIABLE_ITEMS);
}

/// Kind of a prepared statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatementType {
    /// `SELECT`.
    Select,
    /// `SELECT ... FOR UPDATE`.
    SelectForUpdate,
    /// `INSERT`.
    Insert,
    /// `UPDATE`.
    Update,
    /// `DELETE`.
    Delete,
    /// DDL.
    Ddl,
    /// `EXECUTE PROCEDURE` or DML with `RETURNING`.
    ExecProcedure,
    /// Any other statement type code.
    Other(i32),
}

impl StatementType {
    /// Statement type from its code.
    #[must_use]
    pub const fn from_code(code: i32) -> Self {
        match code {
            stmt_type::SELECT => Self::Select,
            stmt_type::SELECT_FOR_UPDATE => Self::SelectForUpdate,
            stmt_type::INSERT => Self::Insert,
            stmt_type::UPDATE => Self::Update,
            stmt_type::DELETE => Self::Delete,
            stmt_type::DDL => Self::Ddl,
            stmt_type::EXEC_PROCEDURE => Self::ExecProcedure,
            other => Self::Other(other),
        }
    }

    /// Whether executing the statement opens a cursor.
    #[must_use]
    pub const fn has_cursor(self) -> bool {
        matches!(self, Self::Select | Self::SelectForUpdate)
    }
}

/// Read info clusters into `(item, value)` pairs.
///
/// Returns the pairs and whether the response was truncated.
pub fn parse_items(data: &[u8]) -> Result<(Vec<(u8, Bytes)>, bool), ProtocolError> {
    let mut src = data;
    let mut items = Vec::new();
    while src.has_remaining() {
        let item = src.get_u8();
        match item {
            info::END => return Ok((items, false)),
            info::TRUNCATED => return Ok((items, true)),
            info::ERROR => {
                return Err(ProtocolError::malformed("info response", "server reported isc_info_error"));
            }
            _ => {
                let value = read_cluster(&mut src, item)?;
                items.push((item, value));
            }
        }
    }
    Err(ProtocolError::malformed("info response", "missing isc_info_end"))
}

fn read_cluster(src: &mut &[u8], item: u8) -> Result<Bytes, ProtocolError> {
    if src.remaining() < 2 {
        return Err(ProtocolError::malformed(
            "info response",
            format!("item {item} has no length"),
        ));
    }
    let len = usize::from(src.get_u16_le());
    if src.remaining() < len {
        return Err(ProtocolError::malformed(
            "info response",
            format!("item {item} declares {len} bytes, {} left", src.remaining()),
        ));
    }
    Ok(src.copy_to_bytes(len))
}

/// Database properties reported after attach.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DatabaseInfo {
    /// SQL dialect of the database.
    pub dialect: Option<i32>,
    /// On-disk structure major version.
    pub ods_major: Option<i32>,
    /// On-disk structure minor version.
    pub ods_minor: Option<i32>,
    /// Server implementation version strings.
    pub server_version: Vec<String>,
}

impl DatabaseInfo {
    /// Parse the response to [`DATABASE_INFO_ITEMS`].
    pub fn parse(data: &[u8]) -> Result<Self, ProtocolError> {
        let (items, _) = parse_items(data)?;
        let mut result = Self::default();
        for (item, value) in items {
            match item {
                info::DB_SQL_DIALECT => result.dialect = Some(xdr::vax_integer(&value)),
                info::ODS_VERSION => result.ods_major = Some(xdr::vax_integer(&value)),
                info::ODS_MINOR_VERSION => result.ods_minor = Some(xdr::vax_integer(&value)),
                info::ISC_VERSION => result.server_version = parse_version_strings(&value)?,
                _ => {}
            }
        }
        Ok(result)
    }
}

fn parse_version_strings(mut value: &[u8]) -> Result<Vec<String>, ProtocolError> {
    if value.is_empty() {
        return Ok(Vec::new());
    }
    let count = value.get_u8();
    let mut strings = Vec::with_capacity(usize::from(count));
    for _ in 0..count {
        if value.is_empty() {
            return Err(ProtocolError::malformed("isc_info_version", "missing string"));
        }
        let len = usize::from(value.get_u8());
        if value.len() < len {
            return Err(ProtocolError::malformed("isc_info_version", "string overruns item"));
        }
        strings.push(String::from_utf8_lossy(&value[..len]).into_owned());
        value.advance(len);
    }
    Ok(strings)
}

/// One described column or parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDescription {
    /// Type of the value.
    pub descriptor: TypeDescriptor,
    /// Column name.
    pub field_name: String,
    /// Column alias.
    pub alias: String,
    /// Relation the column belongs to.
    pub relation: String,
    /// Alias of the relation.
    pub relation_alias: String,
    /// Owner of the relation.
    pub owner: String,
}

/// Result of describing a prepared statement.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatementDescription {
    /// Statement type code, if reported.
    pub statement_type: Option<i32>,
    /// Output columns.
    pub fields: Vec<FieldDescription>,
    /// Input parameters.
    pub parameters: Vec<FieldDescription>,
}

impl StatementDescription {
    /// Statement kind.
    #[must_use]
    pub fn kind(&self) -> Option<StatementType> {
        self.statement_type.map(StatementType::from_code)
    }
}

/// Outcome of feeding one describe response to a [`DescribeParser`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DescribeProgress {
    /// The description is complete.
    Complete,
    /// Send these items with `op_info_sql` and feed the response.
    Continue(Bytes),
}

#[derive(Debug, Default)]
struct Section {
    expected: Option<usize>,
    fields: Vec<FieldDescription>,
}

impl Section {
    fn is_complete(&self) -> bool {
        self.expected.is_some_and(|n| self.fields.len() >= n)
    }
}

#[derive(Debug, Default)]
struct PendingField {
    index: usize,
    sql_type: i32,
    sub_type: i32,
    scale: i32,
    length: i32,
    field_name: String,
    alias: String,
    relation: String,
    relation_alias: String,
    owner: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SectionKind {
    Select,
    Bind,
}

/// Accumulates a statement description across truncated responses.
#[derive(Debug, Default)]
pub struct DescribeParser {
    statement_type: Option<i32>,
    select: Section,
    bind: Section,
    bind_pending: bool,
}

impl DescribeParser {
    /// Create an empty parser.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse one describe response.
    pub fn feed(&mut self, data: &[u8]) -> Result<DescribeProgress, ProtocolError> {
        let mut src = data;
        let mut current: Option<SectionKind> = None;
        let mut pending: Option<PendingField> = None;
        let mut truncated = false;

        loop {
            if !src.has_remaining() {
                return Err(ProtocolError::malformed("sql describe", "missing isc_info_end"));
            }
            let item = src.get_u8();
            match item {
                info::END => break,
                info::TRUNCATED => {
                    truncated = true;
                    break;
                }
                sql_info::SELECT => current = Some(SectionKind::Select),
                sql_info::BIND => current = Some(SectionKind::Bind),
                sql_info::DESCRIBE_END => {
                    let field = pending.take().ok_or_else(|| {
                        ProtocolError::malformed("sql describe", "describe end without variable")
                    })?;
                    self.finish_field(current, field)?;
                }
                _ => {
                    let value = read_cluster(&mut src, item)?;
                    self.apply(item, &value, current, &mut pending)?;
                }
            }
        }

        let next = if !self.select.is_complete() {
            Some((sql_info::SELECT, &self.select))
        } else if !self.bind.is_complete() {
            Some((sql_info::BIND, &self.bind))
        } else {
            None
        };
        let Some((section, progress)) = next else {
            return Ok(DescribeProgress::Complete);
        };
        let start = progress.fields.len() + 1;

        if !truncated {
            if progress.expected.is_some() {
                return Err(ProtocolError::malformed(
                    "sql describe",
                    "response ended before all variables were described",
                ));
            }
            if section == sql_info::BIND && self.bind_pending {
                self.bind_pending = false;
                return Ok(DescribeProgress::Continue(continuation_items(section, start)?));
            }
            return Ok(DescribeProgress::Complete);
        }

        // a partially described variable is requested again
        if section == sql_info::SELECT {
            self.bind_pending = true;
        }
        Ok(DescribeProgress::Continue(continuation_items(section, start)?))
    }

    fn apply(
        &mut self,
        item: u8,
        value: &[u8],
        current: Option<SectionKind>,
        pending: &mut Option<PendingField>,
    ) -> Result<(), ProtocolError> {
        let text = || String::from_utf8_lossy(value).into_owned();
        match item {
            sql_info::STMT_TYPE => self.statement_type = Some(xdr::vax_integer(value)),
            sql_info::DESCRIBE_VARS => {
                let count = usize::try_from(xdr::vax_integer(value)).map_err(|_| {
                    ProtocolError::malformed("sql describe", "negative variable count")
                })?;
                self.section_mut(current)?.expected = Some(count);
            }
            sql_info::SQLDA_SEQ => {
                let index = usize::try_from(xdr::vax_integer(value))
                    .ok()
                    .filter(|i| *i > 0)
                    .ok_or_else(|| ProtocolError::malformed("sql describe", "invalid sqlda_seq"))?;
                *pending = Some(PendingField {
                    index,
                    ..PendingField::default()
                });
            }
            _ => {
                let Some(field) = pending.as_mut() else {
                    // items outside a variable are not requested; ignore them
                    return Ok(());
                };
                match item {
                    sql_info::TYPE => field.sql_type = xdr::vax_integer(value),
                    sql_info::SUB_TYPE => field.sub_type = xdr::vax_integer(value),
                    sql_info::SCALE => field.scale = xdr::vax_integer(value),
                    sql_info::LENGTH => field.length = xdr::vax_integer(value),
                    sql_info::FIELD => field.field_name = text(),
                    sql_info::ALIAS => field.alias = text(),
                    sql_info::RELATION => field.relation = text(),
                    sql_info::RELATION_ALIAS => field.relation_alias = text(),
                    sql_info::OWNER => field.owner = text(),
                    _ => {}
                }
            }
        }
        Ok(())
    }

    fn section_mut(&mut self, kind: Option<SectionKind>) -> Result<&mut Section, ProtocolError> {
        match kind {
            Some(SectionKind::Select) => Ok(&mut self.select),
            Some(SectionKind::Bind) => Ok(&mut self.bind),
            None => Err(ProtocolError::malformed(
                "sql describe",
                "variable outside select or bind section",
            )),
        }
    }

    fn finish_field(
        &mut self,
        kind: Option<SectionKind>,
        field: PendingField,
    ) -> Result<(), ProtocolError> {
        let description = FieldDescription {
            descriptor: TypeDescriptor::from_wire(
                field.sql_type,
                field.sub_type,
                field.length,
                field.scale,
            )?,
            field_name: field.field_name,
            alias: field.alias,
            relation: field.relation,
            relation_alias: field.relation_alias,
            owner: field.owner,
        };
        let section = self.section_mut(kind)?;
        let position = field.index - 1;
        match position.cmp(&section.fields.len()) {
            core::cmp::Ordering::Less => section.fields[position] = description,
            core::cmp::Ordering::Equal => section.fields.push(description),
            core::cmp::Ordering::Greater => {
                return Err(ProtocolError::malformed(
                    "sql describe",
                    format!("variable {} described before {}", field.index, position),
                ));
            }
        }
        Ok(())
    }

    /// Finish parsing and return the description.
    #[must_use]
    pub fn finish(self) -> StatementDescription {
        StatementDescription {
            statement_type: self.statement_type,
            fields: self.select.fields,
            parameters: self.bind.fields,
        }
    }
}

fn continuation_items(section: u8, start: usize) -> Result<Bytes, ProtocolError> {
    let start = u16::try_from(start)
        .map_err(|_| ProtocolError::malformed("sql describe", "too many variables"))?;
    let mut items = BytesMut::with_capacity(VARIABLE_ITEMS.len() + 8);
    items.put_u8(sql_info::SQLDA_START);
    items.put_u16_le(2);
    items.put_u16_le(start);
    put_section_items(&mut items, section);
    items.put_u8(info::END);
    Ok(items.freeze())
}
