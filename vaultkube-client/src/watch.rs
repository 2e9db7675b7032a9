//! The watch reader (component G): turns a chunked NDJSON watch response into a typed
//! event stream, tracking bookmarks and reconnecting on ordinary disconnects.
//!
//! A `410 Gone` ("resourceVersion too old") is recovered transparently: the caller's
//! `resourceVersion` is stale, so a plain (non-watch) list is issued against the same
//! path to obtain a fresh one, and the watch loop resumes from there instead of
//! surfacing the error.
use std::sync::Arc;

use bytes::Bytes;
use futures::{Stream, StreamExt};
use http::Method;
use serde_json::Value;
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};
use tokio_util::io::StreamReader;
use tracing::warn;
use vaultkube_core::Resource;

use crate::error::{Error, ErrorEnvelope};
use crate::rest_client::RestClient;
use crate::selectors::QueryParams;

const MAX_WATCH_LINE_BYTES: usize = 10 * 1024 * 1024;

/// One decoded watch event.
#[derive(Debug, Clone)]
pub enum WatchEvent<T> {
    /// An object was created, or is being reported as part of the initial list-as-watch.
    Added(T),
    /// An object changed.
    Modified(T),
    /// An object was deleted.
    Deleted(T),
    /// A periodic checkpoint carrying a `resourceVersion` safe to resume from; carries
    /// no object data of its own.
    Bookmark {
        /// The resource version to pass as `resourceVersion` on a reconnect.
        resource_version: String,
    },
}

#[derive(Debug, serde::Deserialize)]
struct RawEvent {
    #[serde(rename = "type")]
    event_type: String,
    object: Value,
}

#[derive(Debug, Default, serde::Deserialize)]
struct StatusObject {
    code: Option<u16>,
    reason: Option<String>,
    message: Option<String>,
}

fn decode_event<T: Resource>(raw: RawEvent) -> Result<Option<WatchEvent<T>>, Error> {
    match raw.event_type.as_str() {
        "ADDED" => Ok(Some(WatchEvent::Added(T::decode(raw.object)?))),
        "MODIFIED" => Ok(Some(WatchEvent::Modified(T::decode(raw.object)?))),
        "DELETED" => Ok(Some(WatchEvent::Deleted(T::decode(raw.object)?))),
        "BOOKMARK" => {
            let resource_version = raw
                .object
                .get("metadata")
                .and_then(|m| m.get("resourceVersion"))
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            Ok(Some(WatchEvent::Bookmark { resource_version }))
        }
        "ERROR" => {
            let status: StatusObject = serde_json::from_value(raw.object).unwrap_or_default();
            let code = status.code.unwrap_or(500);
            let envelope = ErrorEnvelope {
                reason: status.reason,
                message: status.message,
                details: None,
                http_status: code,
            };
            Err(Error::from_status(code, envelope))
        }
        other => {
            warn!(event_type = other, "ignoring unrecognized watch event type");
            Ok(None)
        }
    }
}

fn body_to_async_read(body: hyper::body::Incoming) -> impl tokio::io::AsyncRead {
    let stream = http_body_util::BodyStream::new(body).filter_map(|frame| async move {
        match frame {
            Ok(f) => f.into_data().ok().map(Ok::<Bytes, std::io::Error>),
            Err(e) => Some(Err(std::io::Error::other(e.to_string()))),
        }
    });
    StreamReader::new(stream)
}

/// Open a resumable watch over `path` (a collection or single-item path with
/// `query.watch` forced on), yielding decoded events in order. Ordinary stream drops
/// (server restart, load balancer idle timeout) cause an automatic reconnect from the
/// last bookmark or event's resource version. A `410 Gone` ("resourceVersion too old")
/// is recovered the same way, except the fresh resource version comes from a plain
/// list against `path` rather than the last event seen.
pub fn watch<T>(rest: Arc<RestClient>, path: String, mut query: QueryParams) -> impl Stream<Item = Result<WatchEvent<T>, Error>>
where
    T: Resource + Send + 'static,
{
    async_stream::try_stream! {
        query.watch = true;
        loop {
            let (_key, resp) = rest.open_watch(&path, &query).await?;
            let reader = body_to_async_read(resp.into_body());
            let lines = FramedRead::new(reader, LinesCodec::new_with_max_length(MAX_WATCH_LINE_BYTES));
            let mut lines = std::pin::pin!(lines);

            loop {
                let line = match lines.next().await {
                    None => break,
                    Some(Ok(line)) => line,
                    Some(Err(LinesCodecError::MaxLineLengthExceeded)) => Err(Error::WatchLineTooLong)?,
                    Some(Err(LinesCodecError::Io(e))) => Err(Error::Io(e))?,
                };
                if line.trim().is_empty() {
                    continue;
                }
                let raw: RawEvent = serde_json::from_str(&line)?;
                match decode_event::<T>(raw) {
                    Ok(Some(WatchEvent::Bookmark { resource_version })) => {
                        query.resource_version = Some(resource_version.clone());
                        yield WatchEvent::Bookmark { resource_version };
                    }
                    Ok(Some(event)) => {
                        if let Some(rv) = event_resource_version(&event) {
                            query.resource_version = Some(rv);
                        }
                        yield event;
                    }
                    Ok(None) => {}
                    Err(err) if err.http_status() == Some(410) => {
                        warn!("watch resourceVersion expired, relisting to resume");
                        query.resource_version = relist_resource_version::<T>(&rest, &path, &query).await?;
                        break;
                    }
                    Err(err) => Err(err)?,
                }
            }
            // The body ended without an error (server-initiated disconnect, or a 410
            // relist above); loop back and reopen from the resource version we have.
        }
    }
}

/// Issue a plain (non-watch) list against `path` to recover from a `410 Gone`, and
/// return the list's `resourceVersion` to resume watching from.
async fn relist_resource_version<T: Resource>(rest: &RestClient, path: &str, query: &QueryParams) -> Result<Option<String>, Error> {
    let mut list_query = query.clone();
    list_query.watch = false;
    let value = rest.send(Method::GET, path, &list_query, None, None).await?;
    Ok(value
        .get("metadata")
        .and_then(|m| m.get("resourceVersion"))
        .and_then(Value::as_str)
        .map(str::to_string))
}

fn event_resource_version<T: Resource>(event: &WatchEvent<T>) -> Option<String> {
    match event {
        WatchEvent::Added(obj) | WatchEvent::Modified(obj) | WatchEvent::Deleted(obj) => obj.meta().resource_version.clone(),
        WatchEvent::Bookmark { resource_version } => Some(resource_version.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use serde_json::json;
    use std::collections::BTreeMap;
    use vaultkube_core::{ListMergeStrategy, ObjectMeta, PatchKind, ResourceDescriptor};

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Widget {
        #[serde(rename = "apiVersion")]
        api_version: String,
        kind: String,
        metadata: ObjectMeta,
    }

    static WIDGET_DESCRIPTOR: ResourceDescriptor = ResourceDescriptor {
        group: String::new(),
        version: String::new(),
        kind: String::new(),
        plural: String::new(),
        namespaced: false,
        api_path_template: String::new(),
        supported_patch_kinds: Vec::new(),
        list_merge_strategies: BTreeMap::new(),
    };

    impl Resource for Widget {
        type List = Value;
        fn descriptor() -> &'static ResourceDescriptor {
            &WIDGET_DESCRIPTOR
        }
        fn meta(&self) -> &ObjectMeta {
            &self.metadata
        }
        fn meta_mut(&mut self) -> &mut ObjectMeta {
            &mut self.metadata
        }
    }

    fn raw(event_type: &str, object: Value) -> RawEvent {
        RawEvent {
            event_type: event_type.to_string(),
            object,
        }
    }

    #[test]
    fn decodes_added_modified_deleted() {
        let obj = json!({"apiVersion": "v1", "kind": "Widget", "metadata": {"name": "w1", "resourceVersion": "5"}});
        match decode_event::<Widget>(raw("ADDED", obj.clone())).unwrap().unwrap() {
            WatchEvent::Added(w) => assert_eq!(w.metadata.name.as_deref(), Some("w1")),
            _ => panic!("expected Added"),
        }
        assert!(matches!(
            decode_event::<Widget>(raw("MODIFIED", obj.clone())).unwrap().unwrap(),
            WatchEvent::Modified(_)
        ));
        assert!(matches!(decode_event::<Widget>(raw("DELETED", obj)).unwrap().unwrap(), WatchEvent::Deleted(_)));
    }

    #[test]
    fn decodes_bookmark() {
        let obj = json!({"metadata": {"resourceVersion": "42"}});
        match decode_event::<Widget>(raw("BOOKMARK", obj)).unwrap().unwrap() {
            WatchEvent::Bookmark { resource_version } => assert_eq!(resource_version, "42"),
            _ => panic!("expected Bookmark"),
        }
    }

    #[test]
    fn error_event_with_410_decodes_to_a_retryable_error() {
        // decode_event itself still turns a 410 ERROR event into an Err -- it's
        // `watch()`'s outer loop that catches this status and relists instead of
        // propagating it to the caller.
        let obj = json!({"code": 410, "reason": "Expired", "message": "too old resource version"});
        let err = decode_event::<Widget>(raw("ERROR", obj)).unwrap_err();
        assert_eq!(err.http_status(), Some(410));
    }

    #[test]
    fn unrecognized_event_type_is_ignored() {
        assert!(decode_event::<Widget>(raw("WEIRD", json!({}))).unwrap().is_none());
    }
}
