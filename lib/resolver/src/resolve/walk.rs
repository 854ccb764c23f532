use bytes::{BufMut, Bytes};
use futures::future::{join_all, BoxFuture};

use crate::buffer::BufPair;
use crate::consts::{
    COLON, COMMA, EMPTY_ARRAY, EMPTY_OBJECT, LBRACE, LBRACK, NULL, QUOTE, QUOTED_COMMA, RBRACE,
    RBRACK, UNABLE_TO_RESOLVE,
};
use crate::context::{Context, PathElement};
use crate::error::ResolveError;
use crate::json::{self, JsonKind};
use crate::plan::{Array, BooleanNode, FloatNode, IntegerNode, Node, Object, StringNode};
use crate::pool;
use crate::resolve::fetch::ResultSet;
use crate::resolve::Resolver;

impl Resolver {
    pub(crate) fn resolve_node<'a>(
        &'a self,
        ctx: &'a mut Context,
        node: &'a Node,
        data: &'a [u8],
        buf: &'a mut BufPair,
    ) -> BoxFuture<'a, Result<(), ResolveError>> {
        Box::pin(async move {
            match node {
                Node::Object(object) => self.resolve_object(ctx, object, data, buf).await,
                Node::Array(array) => self.resolve_array(ctx, array, data, buf).await,
                Node::Null(null) => {
                    if null.defer.enabled {
                        self.prepare_patch(ctx, null.defer.patch_index, None, data);
                    }
                    buf.data.put_slice(NULL);
                    Ok(())
                }
                Node::String(string) => self.resolve_string(string, data, buf),
                Node::Boolean(boolean) => self.resolve_boolean(boolean, data, buf),
                Node::Integer(integer) => self.resolve_integer(integer, data, buf),
                Node::Float(float) => self.resolve_float(float, data, buf),
                Node::EmptyObject => {
                    buf.data.put_slice(EMPTY_OBJECT);
                    Ok(())
                }
                Node::EmptyArray => {
                    buf.data.put_slice(EMPTY_ARRAY);
                    Ok(())
                }
            }
        })
    }

    async fn resolve_object(
        &self,
        ctx: &mut Context,
        object: &Object,
        data: &[u8],
        object_buf: &mut BufPair,
    ) -> Result<(), ResolveError> {
        let data_holder;
        let mut data = data;
        if !object.path.is_empty() {
            data = match json::get_value(data, &object.path) {
                Some(value) => {
                    data_holder = value;
                    json::unquoted(&data_holder).as_bytes()
                }
                None => &[],
            };
            if data.is_empty() {
                if object.nullable {
                    object_buf.data.put_slice(NULL);
                    return Ok(());
                }
                self.add_resolve_error(ctx, object_buf);
                return Err(ResolveError::NonNullableNull);
            }
        }

        let mut set = None;
        if let Some(fetch) = &object.fetch {
            let mut result_set = self.get_result_set();
            if let Err(err) = self.resolve_fetch(ctx, fetch, data, &mut result_set).await {
                self.free_result_set(result_set);
                return Err(err);
            }
            for buffer in result_set.buffers.values_mut() {
                object_buf.merge_errors(buffer);
            }
            set = Some(result_set);
        }

        let mut field_buf = self.get_buf_pair();
        let result = self
            .resolve_object_fields(ctx, object, data, set.as_ref(), &mut field_buf, object_buf)
            .await;
        self.free_buf_pair(field_buf);
        if let Some(set) = set {
            self.free_result_set(set);
        }
        result
    }

    async fn resolve_object_fields(
        &self,
        ctx: &mut Context,
        object: &Object,
        data: &[u8],
        set: Option<&ResultSet>,
        field_buf: &mut BufPair,
        object_buf: &mut BufPair,
    ) -> Result<(), ResolveError> {
        let mut type_name_skip = false;
        let mut first = true;
        for field in &object.fields {
            let field_data: &[u8] = if field.has_buffer {
                match set.and_then(|s| s.buffers.get(&field.buffer_id)) {
                    Some(buffer) => &buffer.data,
                    None => &[],
                }
            } else {
                data
            };

            if let Some(on_type_name) = &field.on_type_name {
                let type_name = json::get_value(field_data, &["__typename"]);
                let matches_type = type_name
                    .as_ref()
                    .map(|value| json::unquoted(value).as_bytes() == on_type_name.as_ref())
                    .unwrap_or(false);
                if !matches_type {
                    type_name_skip = true;
                    continue;
                }
            }

            if first {
                object_buf.data.put_slice(LBRACE);
                first = false;
            } else {
                object_buf.data.put_slice(COMMA);
            }
            object_buf.data.put_slice(QUOTE);
            object_buf.data.put_slice(&field.name);
            object_buf.data.put_slice(QUOTE);
            object_buf.data.put_slice(COLON);

            ctx.add_path_element(field.name.clone());
            ctx.set_position(field.position);
            let result = self
                .resolve_node(ctx, &field.value, field_data, field_buf)
                .await;
            match result {
                Ok(()) => {
                    ctx.remove_last_path_element();
                    object_buf.merge(field_buf, false);
                }
                Err(ResolveError::TypeNameSkipped) => {
                    ctx.remove_last_path_element();
                    object_buf.data.clear();
                    object_buf.data.put_slice(EMPTY_OBJECT);
                    return Ok(());
                }
                Err(ResolveError::NonNullableNull) => {
                    object_buf.data.clear();
                    object_buf.merge_errors(field_buf);
                    if object.nullable {
                        ctx.remove_last_path_element();
                        object_buf.data.put_slice(NULL);
                        return Ok(());
                    }
                    // Object children have already reported their own failure.
                    if !matches!(field.value, Node::Object(_)) {
                        self.add_resolve_error(ctx, object_buf);
                    }
                    ctx.remove_last_path_element();
                    return Err(ResolveError::NonNullableNull);
                }
                Err(err) => {
                    ctx.remove_last_path_element();
                    return Err(err);
                }
            }
        }

        if first {
            if type_name_skip {
                return Err(ResolveError::TypeNameSkipped);
            }
            if !object.nullable {
                self.add_resolve_error(ctx, object_buf);
                return Err(ResolveError::NonNullableNull);
            }
            object_buf.data.put_slice(NULL);
            return Ok(());
        }
        object_buf.data.put_slice(RBRACE);
        Ok(())
    }

    async fn resolve_array(
        &self,
        ctx: &mut Context,
        array: &Array,
        data: &[u8],
        array_buf: &mut BufPair,
    ) -> Result<(), ResolveError> {
        if data == EMPTY_ARRAY {
            array_buf.data.put_slice(EMPTY_ARRAY);
            return Ok(());
        }

        let holder;
        let array_raw = if array.path.is_empty() {
            std::str::from_utf8(data).ok()
        } else {
            match json::get_value(data, &array.path) {
                Some(value) => {
                    holder = value;
                    Some(holder.as_raw_str())
                }
                None => None,
            }
        };
        let items = match array_raw {
            Some(raw) => json::array_elements(raw),
            None => Vec::new(),
        };

        if items.is_empty() {
            if !array.nullable {
                array_buf.data.put_slice(EMPTY_ARRAY);
                return Err(ResolveError::NonNullableNull);
            }
            array_buf.data.put_slice(NULL);
            return Ok(());
        }

        if array.resolve_asynchronous && !array.stream.enabled {
            self.resolve_array_asynchronous(ctx, array, &items, array_buf)
                .await
        } else {
            self.resolve_array_synchronous(ctx, array, &items, array_buf)
                .await
        }
    }

    async fn resolve_array_synchronous(
        &self,
        ctx: &mut Context,
        array: &Array,
        items: &[sonic_rs::LazyValue<'_>],
        array_buf: &mut BufPair,
    ) -> Result<(), ResolveError> {
        let mut item_buf = self.get_buf_pair();
        array_buf.data.put_slice(LBRACK);
        let mut has_previous_item = false;
        let mut data_written = 0usize;
        for (i, item) in items.iter().enumerate() {
            let item_data = json::unquoted(item).as_bytes();

            if array.stream.enabled && i >= array.stream.initial_batch_size {
                ctx.add_index_path_element(i);
                self.prepare_patch(ctx, array.stream.patch_index, None, item_data);
                ctx.remove_last_path_element();
                continue;
            }

            ctx.add_index_path_element(i);
            let result = self
                .resolve_node(ctx, &array.item, item_data, &mut item_buf)
                .await;
            ctx.remove_last_path_element();
            if let Err(err) = result {
                match err {
                    ResolveError::NonNullableNull if array.nullable => {
                        array_buf.data.clear();
                        array_buf.data.put_slice(NULL);
                        self.free_buf_pair(item_buf);
                        return Ok(());
                    }
                    ResolveError::TypeNameSkipped => continue,
                    err => {
                        self.free_buf_pair(item_buf);
                        return Err(err);
                    }
                }
            }
            data_written += item_buf.data.len();
            array_buf.merge(&mut item_buf, has_previous_item);
            if !has_previous_item && data_written != 0 {
                has_previous_item = true;
            }
        }

        array_buf.data.put_slice(RBRACK);
        self.free_buf_pair(item_buf);
        Ok(())
    }

    /// Fans out one task per element on a cloned context; buffers are merged
    /// back in element order, so output is identical to the synchronous
    /// path regardless of completion order.
    async fn resolve_array_asynchronous(
        &self,
        ctx: &Context,
        array: &Array,
        items: &[sonic_rs::LazyValue<'_>],
        array_buf: &mut BufPair,
    ) -> Result<(), ResolveError> {
        array_buf.data.put_slice(LBRACK);

        let item_futures: Vec<_> = items
            .iter()
            .enumerate()
            .map(|(i, item)| {
                let mut item_ctx = ctx.clone();
                let mut item_buf = self.get_buf_pair();
                let item_data = json::unquoted(item).as_bytes();
                async move {
                    item_ctx.add_index_path_element(i);
                    let result = self
                        .resolve_node(&mut item_ctx, &array.item, item_data, &mut item_buf)
                        .await;
                    (item_buf, result)
                }
            })
            .collect();

        let mut first_err = None;
        let mut item_buffers = Vec::with_capacity(items.len());
        for (item_buf, result) in join_all(item_futures).await {
            if let Err(err) = result {
                if !matches!(err, ResolveError::TypeNameSkipped) && first_err.is_none() {
                    first_err = Some(err);
                }
            }
            item_buffers.push(item_buf);
        }

        if let Some(err) = first_err {
            for item_buf in item_buffers {
                self.free_buf_pair(item_buf);
            }
            if matches!(err, ResolveError::NonNullableNull) && array.nullable {
                array_buf.data.clear();
                array_buf.data.put_slice(NULL);
                return Ok(());
            }
            return Err(err);
        }

        let mut has_previous_item = false;
        let mut data_written = 0usize;
        for mut item_buf in item_buffers {
            data_written += item_buf.data.len();
            array_buf.merge(&mut item_buf, has_previous_item);
            if !has_previous_item && data_written != 0 {
                has_previous_item = true;
            }
            self.free_buf_pair(item_buf);
        }

        array_buf.data.put_slice(RBRACK);
        Ok(())
    }

    fn resolve_string(
        &self,
        string: &StringNode,
        data: &[u8],
        buf: &mut BufPair,
    ) -> Result<(), ResolveError> {
        if !data.is_empty() && string.path.is_empty() {
            // Accepts whole payloads that are either a JSON string or start
            // with a letter, tolerating unquoted single-word responses.
            if json::kind_of(data) == JsonKind::String || char::from(data[0]).is_alphabetic() {
                buf.data.put_slice(QUOTE);
                buf.data.put_slice(data);
                buf.data.put_slice(QUOTE);
                return Ok(());
            }
            if !string.nullable {
                return Err(ResolveError::NonNullableNull);
            }
            buf.data.put_slice(NULL);
            return Ok(());
        }

        match json::get_value(data, &string.path) {
            Some(value) if json::kind_of(value.as_raw_str().as_bytes()) == JsonKind::String => {
                buf.data.put_slice(value.as_raw_str().as_bytes());
                Ok(())
            }
            _ => {
                if !string.nullable {
                    return Err(ResolveError::NonNullableNull);
                }
                buf.data.put_slice(NULL);
                Ok(())
            }
        }
    }

    fn resolve_boolean(
        &self,
        boolean: &BooleanNode,
        data: &[u8],
        buf: &mut BufPair,
    ) -> Result<(), ResolveError> {
        let holder;
        let raw = if boolean.path.is_empty() {
            std::str::from_utf8(data).ok()
        } else {
            match json::get_value(data, &boolean.path) {
                Some(value) => {
                    holder = value;
                    Some(holder.as_raw_str())
                }
                None => None,
            }
        };
        match raw {
            Some(raw) if json::kind_of(raw.as_bytes()) == JsonKind::Boolean => {
                buf.data.put_slice(raw.as_bytes());
                Ok(())
            }
            _ => {
                if !boolean.nullable {
                    return Err(ResolveError::NonNullableNull);
                }
                buf.data.put_slice(NULL);
                Ok(())
            }
        }
    }

    fn resolve_integer(
        &self,
        integer: &IntegerNode,
        data: &[u8],
        buf: &mut BufPair,
    ) -> Result<(), ResolveError> {
        let holder;
        let raw = if integer.path.is_empty() {
            std::str::from_utf8(data).ok()
        } else {
            match json::get_value(data, &integer.path) {
                Some(value) => {
                    holder = value;
                    Some(holder.as_raw_str())
                }
                None => None,
            }
        };
        match raw {
            Some(raw) if json::kind_of(raw.as_bytes()) == JsonKind::Number => {
                buf.data.put_slice(raw.as_bytes());
                Ok(())
            }
            _ => {
                if !integer.nullable {
                    return Err(ResolveError::NonNullableNull);
                }
                buf.data.put_slice(NULL);
                Ok(())
            }
        }
    }

    fn resolve_float(
        &self,
        float: &FloatNode,
        data: &[u8],
        buf: &mut BufPair,
    ) -> Result<(), ResolveError> {
        let holder;
        let raw = if float.path.is_empty() {
            std::str::from_utf8(data).ok()
        } else {
            match json::get_value(data, &float.path) {
                Some(value) => {
                    holder = value;
                    Some(holder.as_raw_str())
                }
                None => None,
            }
        };
        match raw {
            Some(raw) if json::kind_of(raw.as_bytes()) == JsonKind::Number => {
                buf.data.put_slice(raw.as_bytes());
                Ok(())
            }
            _ => {
                if !float.nullable {
                    return Err(ResolveError::NonNullableNull);
                }
                buf.data.put_slice(NULL);
                Ok(())
            }
        }
    }

    /// Copies `data` into a pooled buffer and queues a patch at the current
    /// path for the streaming driver to render later.
    pub(crate) fn prepare_patch(
        &self,
        ctx: &mut Context,
        patch_index: usize,
        extra_path: Option<Bytes>,
        data: &[u8],
    ) {
        let mut payload = pool::acquire_buf();
        payload.put_slice(data);
        let path = ctx.path();
        ctx.add_patch(patch_index, path, extra_path, payload);
    }

    /// Appends a synthetic unable-to-resolve error carrying the current
    /// position and path.
    pub(crate) fn add_resolve_error(&self, ctx: &Context, buf: &mut BufPair) {
        let mut digits = itoa::Buffer::new();
        let mut locations = pool::acquire_buf();
        locations.put_slice(b"[{\"line\":");
        locations.put_slice(digits.format(ctx.position().line).as_bytes());
        locations.put_slice(b",\"column\":");
        locations.put_slice(digits.format(ctx.position().column).as_bytes());
        locations.put_slice(b"}]");

        let elements = ctx.path_elements();
        if elements.is_empty() {
            buf.write_err(UNABLE_TO_RESOLVE, Some(&locations[..]), None, None);
            return;
        }

        let mut path = pool::acquire_buf();
        path.put_slice(LBRACK);
        path.put_slice(QUOTE);
        for (i, element) in elements.iter().enumerate() {
            if i != 0 {
                path.put_slice(QUOTED_COMMA);
            }
            match element {
                PathElement::Key(key) => path.put_slice(key),
                PathElement::Index(index) => path.put_slice(digits.format(*index).as_bytes()),
            }
        }
        path.put_slice(QUOTE);
        path.put_slice(RBRACK);
        buf.write_err(
            UNABLE_TO_RESOLVE,
            Some(&locations[..]),
            Some(&path[..]),
            None,
        );
    }
}
