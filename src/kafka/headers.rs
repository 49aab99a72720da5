//! Tenant header codec for bus messages

use rdkafka::message::{Header, Headers, OwnedHeaders};
use uuid::Uuid;

use crate::error::{MarriageError, MarriageResult};
use crate::tenant::{
    Tenant, HEADER_MAJOR_VERSION, HEADER_MINOR_VERSION, HEADER_REGION, HEADER_SPAN_ID,
    HEADER_TENANT_ID,
};

/// Headers for an outbound message, mirroring the command side including
/// the trace span when one was carried in
pub fn tenant_headers(tenant: &Tenant) -> OwnedHeaders {
    let tenant_id = tenant.id.to_string();
    let major = tenant.major_version.to_string();
    let minor = tenant.minor_version.to_string();
    let mut headers = OwnedHeaders::new()
        .insert(Header {
            key: HEADER_TENANT_ID,
            value: Some(&tenant_id),
        })
        .insert(Header {
            key: HEADER_REGION,
            value: Some(&tenant.region),
        })
        .insert(Header {
            key: HEADER_MAJOR_VERSION,
            value: Some(&major),
        })
        .insert(Header {
            key: HEADER_MINOR_VERSION,
            value: Some(&minor),
        });
    if let Some(span_id) = &tenant.span_id {
        headers = headers.insert(Header {
            key: HEADER_SPAN_ID,
            value: Some(span_id),
        });
    }
    headers
}

/// Extract the tenant from an inbound message's headers. `TENANT_ID` is
/// mandatory; region and version fall back to defaults when absent.
pub fn tenant_from_headers<H: Headers>(headers: Option<&H>) -> MarriageResult<Tenant> {
    let headers =
        headers.ok_or_else(|| MarriageError::Envelope("message has no headers".to_string()))?;

    let mut tenant_id = None;
    let mut region = String::new();
    let mut major_version = 0;
    let mut minor_version = 0;
    let mut span_id = None;

    for header in headers.iter() {
        let value = header
            .value
            .map(|v| String::from_utf8_lossy(v).into_owned())
            .unwrap_or_default();
        match header.key {
            HEADER_TENANT_ID => {
                tenant_id = Some(Uuid::parse_str(&value).map_err(|e| {
                    MarriageError::Envelope(format!("bad TENANT_ID header: {e}"))
                })?);
            }
            HEADER_REGION => region = value,
            HEADER_MAJOR_VERSION => major_version = value.parse().unwrap_or(0),
            HEADER_MINOR_VERSION => minor_version = value.parse().unwrap_or(0),
            HEADER_SPAN_ID => {
                if !value.is_empty() {
                    span_id = Some(value);
                }
            }
            _ => {}
        }
    }

    let id = tenant_id
        .ok_or_else(|| MarriageError::Envelope("missing TENANT_ID header".to_string()))?;
    Ok(Tenant {
        id,
        region,
        major_version,
        minor_version,
        span_id,
    })
}
