use bytes::{BufMut, Bytes, BytesMut};
use sonic_rs::{JsonNumberTrait, Value, ValueRef};

use crate::consts::{BACKSLASH, COLON, COMMA, FALSE, LBRACE, LBRACK, NULL, QUOTE, RBRACE, RBRACK, TRUE};
use crate::context::Context;
use crate::error::ResolveError;
use crate::json;
use crate::json_writer;

/// Where a template variable reads its value from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariableSource {
    Object,
    Context,
    RequestHeader,
}

#[derive(Debug, Clone)]
pub enum TemplateSegment {
    Static(Bytes),
    Variable {
        source: VariableSource,
        path: Vec<String>,
        render_as_graphql_value: bool,
    },
}

/// An ordered list of segments rendered into a fetch input payload.
#[derive(Debug, Clone, Default)]
pub struct InputTemplate {
    pub segments: Vec<TemplateSegment>,
}

impl InputTemplate {
    /// Appends each segment to `out` in order. `data` is the parent record
    /// addressed by object variables and may be empty.
    pub fn render(
        &self,
        ctx: &Context,
        data: &[u8],
        out: &mut BytesMut,
    ) -> Result<(), ResolveError> {
        for segment in &self.segments {
            match segment {
                TemplateSegment::Static(bytes) => out.put_slice(bytes),
                TemplateSegment::Variable {
                    source,
                    path,
                    render_as_graphql_value,
                } => match source {
                    VariableSource::Object => render_object_variable(data, path, out)?,
                    VariableSource::Context => {
                        render_context_variable(ctx, path, *render_as_graphql_value, out)?
                    }
                    VariableSource::RequestHeader => render_header_variable(ctx, path, out)?,
                },
            }
        }
        Ok(())
    }
}

fn render_object_variable(
    data: &[u8],
    path: &[String],
    out: &mut BytesMut,
) -> Result<(), ResolveError> {
    // An empty path addresses the whole parent record.
    if path.is_empty() {
        if data.is_empty() {
            return Err(ResolveError::VariableValueNotFound {
                path: String::new(),
            });
        }
        let raw = std::str::from_utf8(data).map_err(|_| ResolveError::VariableValueNotFound {
            path: String::new(),
        })?;
        out.put_slice(json::string_content(raw).as_bytes());
        return Ok(());
    }
    let value = json::get_value(data, path).ok_or_else(|| ResolveError::VariableValueNotFound {
        path: path.join("."),
    })?;
    out.put_slice(json::unquoted(&value).as_bytes());
    Ok(())
}

fn render_context_variable(
    ctx: &Context,
    path: &[String],
    render_as_graphql_value: bool,
    out: &mut BytesMut,
) -> Result<(), ResolveError> {
    let value = json::get_value(&ctx.variables, path).ok_or_else(|| {
        ResolveError::VariableValueNotFound {
            path: path.join("."),
        }
    })?;
    if !render_as_graphql_value {
        out.put_slice(json::unquoted(&value).as_bytes());
        return Ok(());
    }
    render_graphql_value(value.as_raw_str(), path, out)
}

/// Transcodes a JSON fragment into GraphQL literal syntax: unquoted object
/// keys, and strings wrapped in backslash-escaped quotes because the literal
/// is itself embedded in an already-quoted JSON string of the fetch input.
fn render_graphql_value(raw: &str, path: &[String], out: &mut BytesMut) -> Result<(), ResolveError> {
    let value: Value =
        sonic_rs::from_str(raw).map_err(|_| ResolveError::VariableValueNotFound {
            path: path.join("."),
        })?;
    write_graphql_value(value.as_ref(), out);
    Ok(())
}

fn write_graphql_value(value: ValueRef<'_>, out: &mut BytesMut) {
    match value {
        ValueRef::Null => out.put_slice(NULL),
        ValueRef::Bool(value) => out.put_slice(if value { TRUE } else { FALSE }),
        ValueRef::Number(number) => {
            if let Some(value) = number.as_i64() {
                json_writer::write_i64(out, value);
            } else if let Some(value) = number.as_u64() {
                json_writer::write_u64(out, value);
            } else if let Some(value) = number.as_f64() {
                json_writer::write_f64(out, value);
            }
        }
        ValueRef::String(value) => {
            out.put_slice(BACKSLASH);
            out.put_slice(QUOTE);
            json_writer::write_escaped_content(out, value);
            out.put_slice(BACKSLASH);
            out.put_slice(QUOTE);
        }
        ValueRef::Array(values) => {
            out.put_slice(LBRACK);
            for (i, value) in values.iter().enumerate() {
                if i != 0 {
                    out.put_slice(COMMA);
                }
                write_graphql_value(value.as_ref(), out);
            }
            out.put_slice(RBRACK);
        }
        ValueRef::Object(object) => {
            out.put_slice(LBRACE);
            for (i, (key, value)) in object.iter().enumerate() {
                if i != 0 {
                    out.put_slice(COMMA);
                }
                out.put_slice(key.as_bytes());
                out.put_slice(COLON);
                write_graphql_value(value.as_ref(), out);
            }
            out.put_slice(RBRACE);
        }
    }
}

fn render_header_variable(
    ctx: &Context,
    path: &[String],
    out: &mut BytesMut,
) -> Result<(), ResolveError> {
    if path.len() != 1 {
        return Err(ResolveError::HeaderPathInvalid);
    }
    let Ok(name) = http::header::HeaderName::from_bytes(path[0].as_bytes()) else {
        return Ok(());
    };
    let mut first = true;
    for value in ctx.request.header.get_all(&name) {
        if !first {
            out.put_slice(COMMA);
        }
        first = false;
        out.put_slice(value.as_bytes());
    }
    Ok(())
}
