use bytes::BufMut;

use crate::buffer::BufPair;
use crate::json;
use crate::plan::ProcessResponseConfig;

/// Splits a raw upstream envelope into the `data` and `errors` halves of
/// `buf`. Without `extract_graphql_response` the payload is copied verbatim
/// into the data half; with `extract_federation_entities` the data is
/// unwrapped down to `_entities[0]`.
pub(crate) fn extract_response(
    response_data: &[u8],
    buf: &mut BufPair,
    config: ProcessResponseConfig,
) {
    if response_data.is_empty() {
        return;
    }

    if !config.extract_graphql_response {
        buf.data.put_slice(response_data);
        return;
    }

    if let Some(errors) = json::get_value(response_data, &["errors"]) {
        for element in json::array_elements(errors.as_raw_str()) {
            let element_raw = element.as_raw_str().as_bytes();
            let Some(message) = json::get_value(element_raw, &["message"]) else {
                continue;
            };
            let locations = json::get_value(element_raw, &["locations"]);
            let path = json::get_value(element_raw, &["path"]);
            let extensions = json::get_value(element_raw, &["extensions"]);
            buf.write_err(
                json::unquoted(&message).as_bytes(),
                locations.as_ref().map(|v| v.as_raw_str().as_bytes()),
                path.as_ref().map(|v| v.as_raw_str().as_bytes()),
                extensions.as_ref().map(|v| v.as_raw_str().as_bytes()),
            );
        }
    }

    if let Some(data) = json::get_value(response_data, &["data"]) {
        if config.extract_federation_entities {
            let data_raw = data.as_raw_str().as_bytes();
            if let Some(entities) = json::get_value(data_raw, &["_entities"]) {
                if let Some(first) = json::array_elements(entities.as_raw_str()).first() {
                    buf.data.put_slice(json::unquoted(first).as_bytes());
                }
            }
            return;
        }
        buf.data.put_slice(json::unquoted(&data).as_bytes());
    }
}
