//! Batch cursor over a server-side result set.
//!
//! A [`BatchCursor`] hands out one server batch at a time, issuing `getMore`
//! round trips while the server cursor is live and the limit is not reached.
//! It holds one retain on its connection source for exactly as long as a live
//! server cursor exists, and gives it back on every terminal path.

use crate::connection::{Connection, ConnectionSource, ReadPreference, RetainedSource};
use crate::decoder::DocumentDecoder;
use crate::error::CursorError;
use docwire_protocol::{
    number_to_return, CommandFailure, GetMoreCommand, KillCursorsCommand, Namespace,
    QueryResult, ServerAddress, ServerCursor,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Batch field of a `getMore` reply.
const NEXT_BATCH_FIELD: &str = "nextBatch";

/// Cursor tuning.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CursorOptions {
    /// Maximum documents ever returned; zero is unlimited, negative means a
    /// single batch.
    pub limit: i32,
    /// Documents per round trip; zero lets the server choose.
    pub batch_size: i32,
    /// Server-side time limit per `getMore`; zero is unlimited.
    pub max_time_ms: i64,
    /// Pin one connection for all `getMore`s when the server supports it.
    pub exhaust: bool,
}

impl CursorOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limit(mut self, limit: i32) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_batch_size(mut self, batch_size: i32) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_max_time_ms(mut self, max_time_ms: i64) -> Self {
        self.max_time_ms = max_time_ms;
        self
    }

    pub fn with_exhaust(mut self, exhaust: bool) -> Self {
        self.exhaust = exhaust;
        self
    }
}

/// Marks a cursor closed from another thread.
///
/// The owning cursor notices on its next call, or between round trips of an
/// in-flight fetch, and then kills the server cursor and releases its source.
#[derive(Debug, Clone)]
pub struct CloseHandle {
    closed: Arc<AtomicBool>,
}

impl CloseHandle {
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Iterates a server result set batch by batch.
///
/// Dropping a cursor whose server cursor is still live runs [`close`](Self::close),
/// which acquires a connection and sends a kill over the network.
pub struct BatchCursor<S: ConnectionSource, D: DocumentDecoder> {
    namespace: Namespace,
    address: ServerAddress,
    options: CursorOptions,
    decoder: D,
    /// Held exactly while `server_cursor` is live.
    source: Option<RetainedSource<S>>,
    server_cursor: Option<ServerCursor>,
    /// Never holds an empty batch.
    buffered: Option<Vec<D::Output>>,
    count: i32,
    closed: Arc<AtomicBool>,
    /// Set once the close work (kill, release) has run.
    finalized: bool,
    exhaust_connection: Option<S::Connection>,
}

impl<S: ConnectionSource, D: DocumentDecoder> BatchCursor<S, D> {
    /// Creates a cursor from the reply to the opening query.
    ///
    /// `source` is required when `first` carries a live cursor. `connection`
    /// is the connection the query ran on; it is used to kill the cursor when
    /// the first batch already satisfies the limit, and stays owned by the
    /// caller.
    pub fn new(
        first: QueryResult<D::Output>,
        options: CursorOptions,
        decoder: D,
        source: Option<Arc<S>>,
        connection: Option<&mut S::Connection>,
    ) -> Result<Self, CursorError> {
        if options.max_time_ms < 0 {
            return Err(CursorError::InvalidArgument(format!(
                "maxTimeMS must be >= 0, got {}",
                options.max_time_ms
            )));
        }
        if first.cursor.is_some() && source.is_none() {
            return Err(CursorError::MissingConnectionSource);
        }

        let mut cursor = Self {
            namespace: first.namespace.clone(),
            address: first.address.clone(),
            options,
            decoder,
            source: source.map(RetainedSource::new),
            server_cursor: None,
            buffered: None,
            count: 0,
            closed: Arc::new(AtomicBool::new(false)),
            finalized: false,
            exhaust_connection: None,
        };

        cursor.absorb(first);
        if cursor.limit_reached() {
            if let Err(e) = cursor.kill_after_first_batch(connection) {
                tracing::warn!(
                    "Failed to kill cursor on {} after first batch: {}",
                    cursor.address,
                    e
                );
            }
        }
        cursor.release_if_exhausted();
        Ok(cursor)
    }

    /// Returns whether another batch is available, fetching as needed.
    ///
    /// Empty batches from a live server cursor are skipped.
    pub fn has_next(&mut self) -> Result<bool, CursorError> {
        self.ensure_open()?;

        if self.buffered.is_some() {
            return Ok(true);
        }
        if self.limit_reached() {
            return Ok(false);
        }

        while self.server_cursor.is_some() {
            self.get_more()?;
            self.ensure_open()?;
            if self.buffered.is_some() {
                return Ok(true);
            }
        }

        Ok(false)
    }

    /// Returns the next batch, fetching as needed.
    pub fn next_batch(&mut self) -> Result<Vec<D::Output>, CursorError> {
        self.ensure_open()?;

        if !self.has_next()? {
            return Err(CursorError::NoSuchElement);
        }
        self.buffered.take().ok_or(CursorError::NoSuchElement)
    }

    /// Returns the next batch if one is available after at most one round
    /// trip.
    pub fn try_next(&mut self) -> Result<Option<Vec<D::Output>>, CursorError> {
        self.ensure_open()?;

        if self.buffered.is_none() && !self.limit_reached() && self.server_cursor.is_some() {
            self.get_more()?;
        }
        Ok(self.buffered.take())
    }

    pub fn set_batch_size(&mut self, batch_size: i32) {
        self.options.batch_size = batch_size;
    }

    pub fn batch_size(&self) -> i32 {
        self.options.batch_size
    }

    pub fn limit(&self) -> i32 {
        self.options.limit
    }

    /// Documents returned by the server so far.
    pub fn count(&self) -> i32 {
        self.count
    }

    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    /// Returns the live server cursor, if any.
    pub fn server_cursor(&self) -> Result<Option<&ServerCursor>, CursorError> {
        self.check_open()?;
        Ok(self.server_cursor.as_ref())
    }

    pub fn server_address(&self) -> Result<&ServerAddress, CursorError> {
        self.check_open()?;
        Ok(&self.address)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn close_handle(&self) -> CloseHandle {
        CloseHandle {
            closed: self.closed.clone(),
        }
    }

    /// Closes the cursor, killing a live server cursor on a best-effort basis.
    ///
    /// Idempotent. The connection source is released even when the kill fails.
    pub fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
        if self.finalized {
            return;
        }
        self.finalized = true;

        drop(self.exhaust_connection.take());
        if let Err(e) = self.kill_with_new_connection() {
            tracing::warn!("Ignoring failed cursor kill on {}: {}", self.address, e);
        }
        self.server_cursor = None;
        drop(self.source.take());
        self.buffered = None;
    }

    fn check_open(&self) -> Result<(), CursorError> {
        if self.is_closed() {
            return Err(CursorError::IllegalState("cursor has been closed"));
        }
        Ok(())
    }

    /// Like `check_open`, but also finishes a close requested through a
    /// [`CloseHandle`].
    fn ensure_open(&mut self) -> Result<(), CursorError> {
        let result = self.check_open();
        if result.is_err() {
            self.close();
        }
        result
    }

    fn limit_reached(&self) -> bool {
        self.options.limit != 0 && self.count.unsigned_abs() >= self.options.limit.unsigned_abs()
    }

    fn absorb(&mut self, result: QueryResult<D::Output>) {
        self.server_cursor = result.cursor;
        self.count = self
            .count
            .saturating_add(i32::try_from(result.results.len()).unwrap_or(i32::MAX));
        self.buffered = (!result.results.is_empty()).then_some(result.results);
    }

    fn release_if_exhausted(&mut self) {
        if self.server_cursor.is_none() {
            if let Some(source) = self.source.take() {
                tracing::debug!("No live cursor on {}, releasing connection source", self.address);
                drop(source);
            }
        }
    }

    fn acquire(&self) -> Result<S::Connection, CursorError> {
        self.source
            .as_ref()
            .ok_or(CursorError::MissingConnectionSource)?
            .connection()
    }

    fn get_more(&mut self) -> Result<(), CursorError> {
        if let Some(mut pinned) = self.exhaust_connection.take() {
            let result = self.get_more_on(&mut pinned);
            self.keep_pinned(pinned);
            return result;
        }

        let mut connection = self.acquire()?;
        if self.options.exhaust && connection.description().capability().supports_exhaust() {
            tracing::debug!("Pinning exhaust connection to {}", self.address);
            let result = self.get_more_on(&mut connection);
            self.keep_pinned(connection);
            result
        } else {
            self.get_more_on(&mut connection)
        }
    }

    /// Keeps the exhaust connection while the server cursor lives.
    fn keep_pinned(&mut self, connection: S::Connection) {
        if self.server_cursor.is_some() {
            self.exhaust_connection = Some(connection);
        } else {
            tracing::debug!("Releasing exhaust connection to {}", self.address);
        }
    }

    fn get_more_on(&mut self, connection: &mut S::Connection) -> Result<(), CursorError> {
        let Some(cursor) = self.server_cursor.clone() else {
            return Ok(());
        };
        let requested = number_to_return(self.options.limit, self.options.batch_size, self.count);

        let result = if connection.description().capability().supports_cursor_commands() {
            let source = self
                .source
                .as_ref()
                .ok_or(CursorError::MissingConnectionSource)?;
            let command = GetMoreCommand::new(cursor.id(), self.namespace.collection())
                .with_batch_size(requested)
                .with_max_time_ms(self.options.max_time_ms);
            tracing::debug!("getMore on {} (batchSize {})", cursor, command.batch_size.saturating_abs());

            let reply = connection
                .command(
                    self.namespace.database(),
                    command.to_document(),
                    ReadPreference::Primary,
                    source.session_context(),
                    self.options.exhaust,
                )
                .and_then(|reply| CommandFailure::check(reply).map_err(CursorError::from))
                .map_err(|e| match e {
                    CursorError::Command(failure) => {
                        CursorError::for_cursor(failure, cursor.clone(), self.address.clone())
                    }
                    other => other,
                })?;
            QueryResult::from_command_reply(&reply, NEXT_BATCH_FIELD, source.server_address().clone())?
        } else {
            tracing::debug!("OP_GET_MORE on {} (numberToReturn {})", cursor, requested);
            connection.get_more(&self.namespace, cursor.id(), requested)?
        };

        let decoder = &self.decoder;
        let result = result.try_map(|document| decoder.decode(document))?;
        self.absorb(result);

        if self.limit_reached() {
            self.kill_cursor_on(connection)?;
        }
        self.release_if_exhausted();
        Ok(())
    }

    fn kill_after_first_batch(
        &mut self,
        connection: Option<&mut S::Connection>,
    ) -> Result<(), CursorError> {
        if self.server_cursor.is_none() {
            return Ok(());
        }
        match connection {
            Some(connection) => self.kill_cursor_on(connection),
            None => self.kill_with_new_connection(),
        }
    }

    fn kill_with_new_connection(&mut self) -> Result<(), CursorError> {
        if self.server_cursor.is_none() {
            return Ok(());
        }
        let mut connection = self.acquire()?;
        self.kill_cursor_on(&mut connection)
    }

    fn kill_cursor_on(&mut self, connection: &mut S::Connection) -> Result<(), CursorError> {
        let Some(id) = self.server_cursor.as_ref().map(ServerCursor::id) else {
            return Ok(());
        };
        tracing::debug!("Killing cursor {} on {}", id, self.namespace);

        if connection.description().capability().supports_cursor_commands() {
            let source = self
                .source
                .as_ref()
                .ok_or(CursorError::MissingConnectionSource)?;
            let command = KillCursorsCommand::new(self.namespace.collection(), vec![id]);
            let reply = connection.command(
                self.namespace.database(),
                command.to_document(),
                ReadPreference::Primary,
                source.session_context(),
                false,
            )?;
            CommandFailure::check(reply)?;
        } else {
            connection.kill_cursors(&self.namespace, &[id])?;
        }

        self.server_cursor = None;
        Ok(())
    }
}

impl<S: ConnectionSource, D: DocumentDecoder> Iterator for BatchCursor<S, D> {
    type Item = Result<Vec<D::Output>, CursorError>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.has_next() {
            Ok(true) => Some(self.next_batch()),
            Ok(false) => None,
            Err(e) => Some(Err(e)),
        }
    }
}

impl<S: ConnectionSource, D: DocumentDecoder> Drop for BatchCursor<S, D> {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{ConnectionDescription, SessionContext};
    use crate::decoder::{RawDocumentDecoder, SerdeDecoder};
    use docwire_protocol::{Document, CURSOR_NOT_FOUND_CODE};
    use parking_lot::Mutex;
    use proptest::prelude::*;
    use serde_json::{json, Value};
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;

    const LEGACY: i32 = 0;
    const COMMANDS: i32 = 6;
    const EXHAUST: i32 = 8;

    enum Step {
        Batch { docs: Vec<Document>, cursor_id: i64 },
        Fail(CommandFailure),
    }

    #[derive(Default)]
    struct Shared {
        retains: AtomicUsize,
        releases: AtomicUsize,
        acquired: AtomicUsize,
        dropped: AtomicUsize,
        get_mores: AtomicUsize,
        kills: AtomicUsize,
        script: Mutex<VecDeque<Step>>,
        commands: Mutex<Vec<(Document, bool)>>,
        requested: Mutex<Vec<i32>>,
        killed: Mutex<Vec<i64>>,
        fail_kills: AtomicBool,
        close_during_get_more: Mutex<Option<CloseHandle>>,
    }

    impl Shared {
        fn count(counter: &AtomicUsize) -> usize {
            counter.load(Ordering::SeqCst)
        }

        fn next_step(&self, requested: i32) -> Result<(Vec<Document>, i64), CommandFailure> {
            self.get_mores.fetch_add(1, Ordering::SeqCst);
            self.requested.lock().push(requested);
            if let Some(handle) = self.close_during_get_more.lock().take() {
                handle.close();
            }
            match self.script.lock().pop_front() {
                Some(Step::Batch { mut docs, cursor_id }) => {
                    if requested != 0 {
                        docs.truncate(requested.unsigned_abs() as usize);
                    }
                    Ok((docs, cursor_id))
                }
                Some(Step::Fail(failure)) => Err(failure),
                None => Ok((Vec::new(), 0)),
            }
        }

        fn kill(&self, ids: &[i64]) -> Result<(), CursorError> {
            self.kills.fetch_add(1, Ordering::SeqCst);
            if self.fail_kills.load(Ordering::SeqCst) {
                return Err(CursorError::Command(CommandFailure::new(11600, "interrupted")));
            }
            self.killed.lock().extend_from_slice(ids);
            Ok(())
        }
    }

    struct FakeSource {
        shared: Arc<Shared>,
        address: ServerAddress,
        session: SessionContext,
        max_wire_version: i32,
    }

    impl FakeSource {
        fn new(max_wire_version: i32, script: Vec<Step>) -> (Arc<Self>, Arc<Shared>) {
            let shared = Arc::new(Shared::default());
            shared.script.lock().extend(script);
            let source = Arc::new(Self {
                shared: shared.clone(),
                address: ServerAddress::default(),
                session: SessionContext::default(),
                max_wire_version,
            });
            (source, shared)
        }
    }

    struct FakeConnection {
        shared: Arc<Shared>,
        description: ConnectionDescription,
    }

    impl Drop for FakeConnection {
        fn drop(&mut self) {
            self.shared.dropped.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl Connection for FakeConnection {
        fn description(&self) -> &ConnectionDescription {
            &self.description
        }

        fn command(
            &mut self,
            _database: &str,
            command: Document,
            read_preference: ReadPreference,
            _session: &SessionContext,
            exhaust: bool,
        ) -> Result<Document, CursorError> {
            assert_eq!(read_preference, ReadPreference::Primary);
            self.shared.commands.lock().push((command.clone(), exhaust));

            if let Some(ids) = command.get("cursors").and_then(Value::as_array) {
                let ids: Vec<i64> = ids.iter().filter_map(Value::as_i64).collect();
                self.shared.kill(&ids)?;
                return Ok(doc(json!({"cursorsKilled": ids, "ok": 1})));
            }

            let requested = command
                .get("batchSize")
                .and_then(Value::as_i64)
                .unwrap_or(0) as i32;
            match self.shared.next_step(requested) {
                Ok((docs, cursor_id)) => Ok(doc(json!({
                    "cursor": {"id": cursor_id, "ns": "db.coll", "nextBatch": docs},
                    "ok": 1
                }))),
                Err(failure) => Ok(doc(json!({
                    "ok": 0,
                    "code": failure.code,
                    "errmsg": failure.message
                }))),
            }
        }

        fn get_more(
            &mut self,
            namespace: &Namespace,
            cursor_id: i64,
            number_to_return: i32,
        ) -> Result<QueryResult<Document>, CursorError> {
            assert_ne!(cursor_id, 0);
            let (docs, next_id) = self.shared.next_step(number_to_return)?;
            Ok(QueryResult::new(
                namespace.clone(),
                docs,
                next_id,
                self.description.address().clone(),
            ))
        }

        fn kill_cursors(&mut self, _: &Namespace, cursor_ids: &[i64]) -> Result<(), CursorError> {
            self.shared.kill(cursor_ids)
        }
    }

    impl ConnectionSource for FakeSource {
        type Connection = FakeConnection;

        fn connection(&self) -> Result<FakeConnection, CursorError> {
            self.shared.acquired.fetch_add(1, Ordering::SeqCst);
            Ok(FakeConnection {
                shared: self.shared.clone(),
                description: ConnectionDescription::new(self.address.clone(), self.max_wire_version),
            })
        }

        fn session_context(&self) -> &SessionContext {
            &self.session
        }

        fn server_address(&self) -> &ServerAddress {
            &self.address
        }

        fn retain(&self) {
            self.shared.retains.fetch_add(1, Ordering::SeqCst);
        }

        fn release(&self) {
            self.shared.releases.fetch_add(1, Ordering::SeqCst);
        }
    }

    type TestCursor = BatchCursor<FakeSource, RawDocumentDecoder>;

    fn doc(value: Value) -> Document {
        match value {
            Value::Object(map) => map,
            _ => panic!("not a document"),
        }
    }

    fn docs(values: &[i64]) -> Vec<Document> {
        values.iter().map(|v| doc(json!({"_id": v}))).collect()
    }

    fn batch(values: &[i64], cursor_id: i64) -> Step {
        Step::Batch {
            docs: docs(values),
            cursor_id,
        }
    }

    fn first(values: &[i64], cursor_id: i64) -> QueryResult<Document> {
        QueryResult::new(
            "db.coll".parse().unwrap(),
            docs(values),
            cursor_id,
            ServerAddress::default(),
        )
    }

    fn open(
        first: QueryResult<Document>,
        options: CursorOptions,
        source: &Arc<FakeSource>,
    ) -> TestCursor {
        TestCursor::new(first, options, RawDocumentDecoder, Some(source.clone()), None).unwrap()
    }

    fn ids(batch: &[Document]) -> Vec<i64> {
        batch.iter().filter_map(|d| d.get("_id").and_then(Value::as_i64)).collect()
    }

    #[test]
    fn test_exhausted_first_batch_releases_source_at_construction() {
        let (source, shared) = FakeSource::new(LEGACY, vec![]);
        let mut cursor = open(first(&[1, 2], 0), CursorOptions::new(), &source);

        assert_eq!(Shared::count(&shared.retains), 1);
        assert_eq!(Shared::count(&shared.releases), 1);

        assert_eq!(ids(&cursor.next_batch().unwrap()), vec![1, 2]);
        assert!(!cursor.has_next().unwrap());
        cursor.close();

        assert_eq!(Shared::count(&shared.releases), 1);
        assert_eq!(Shared::count(&shared.get_mores), 0);
        assert_eq!(Shared::count(&shared.kills), 0);
    }

    #[test]
    fn test_live_cursor_requires_source() {
        let result = TestCursor::new(first(&[], 42), CursorOptions::new(), RawDocumentDecoder, None, None);
        assert!(matches!(result, Err(CursorError::MissingConnectionSource)));

        let cursor =
            TestCursor::new(first(&[1], 0), CursorOptions::new(), RawDocumentDecoder, None, None)
                .unwrap();
        assert_eq!(BatchCursor::count(&cursor), 1);
    }

    #[test]
    fn test_negative_max_time_rejected() {
        let (source, shared) = FakeSource::new(COMMANDS, vec![]);
        let result = TestCursor::new(
            first(&[], 42),
            CursorOptions::new().with_max_time_ms(-1),
            RawDocumentDecoder,
            Some(source),
            None,
        );
        assert!(matches!(result, Err(CursorError::InvalidArgument(_))));
        assert_eq!(Shared::count(&shared.retains), 0);
    }

    #[test]
    fn test_has_next_uses_buffered_batch() {
        let (source, shared) = FakeSource::new(LEGACY, vec![batch(&[3], 0)]);
        let mut cursor = open(first(&[1, 2], 42), CursorOptions::new(), &source);

        assert!(cursor.has_next().unwrap());
        assert!(cursor.has_next().unwrap());
        assert_eq!(Shared::count(&shared.get_mores), 0);

        assert_eq!(ids(&cursor.next_batch().unwrap()), vec![1, 2]);
        assert!(cursor.has_next().unwrap());
        assert_eq!(Shared::count(&shared.get_mores), 1);
    }

    #[test]
    fn test_has_next_skips_empty_batches() {
        let (source, shared) = FakeSource::new(
            LEGACY,
            vec![batch(&[], 42), batch(&[], 42), batch(&[7], 42)],
        );
        let mut cursor = open(first(&[], 42), CursorOptions::new(), &source);

        assert!(cursor.has_next().unwrap());
        assert_eq!(Shared::count(&shared.get_mores), 3);
        assert_eq!(ids(&cursor.next_batch().unwrap()), vec![7]);
        assert_eq!(Shared::count(&shared.releases), 0);
    }

    #[test]
    fn test_try_next_makes_at_most_one_round_trip() {
        let (source, shared) = FakeSource::new(LEGACY, vec![batch(&[], 42), batch(&[5], 0)]);
        let mut cursor = open(first(&[], 42), CursorOptions::new(), &source);

        assert!(cursor.try_next().unwrap().is_none());
        assert_eq!(Shared::count(&shared.get_mores), 1);

        assert_eq!(ids(&cursor.try_next().unwrap().unwrap()), vec![5]);
        assert_eq!(Shared::count(&shared.get_mores), 2);

        assert!(cursor.try_next().unwrap().is_none());
        assert_eq!(Shared::count(&shared.get_mores), 2);
        assert_eq!(Shared::count(&shared.releases), 1);
    }

    #[test]
    fn test_legacy_round_trips_end_to_end() {
        let (source, shared) =
            FakeSource::new(LEGACY, vec![batch(&[1, 2], 42), batch(&[], 0)]);
        let mut cursor = open(
            first(&[], 42),
            CursorOptions::new().with_batch_size(2),
            &source,
        );

        assert!(cursor.has_next().unwrap());
        assert_eq!(Shared::count(&shared.get_mores), 1);
        assert_eq!(ids(&cursor.next_batch().unwrap()), vec![1, 2]);

        assert!(!cursor.has_next().unwrap());
        assert_eq!(Shared::count(&shared.get_mores), 2);
        assert!(cursor.server_cursor().unwrap().is_none());
        assert_eq!(Shared::count(&shared.releases), 1);
        assert_eq!(*shared.requested.lock(), vec![2, 2]);

        cursor.close();
        assert_eq!(Shared::count(&shared.kills), 0);
        assert_eq!(Shared::count(&shared.releases), 1);
        assert_eq!(Shared::count(&shared.acquired), Shared::count(&shared.dropped));
        assert!(shared.commands.lock().is_empty());
    }

    #[test]
    fn test_limit_reached_by_first_batch_kills_on_supplied_connection() {
        let (source, shared) = FakeSource::new(COMMANDS, vec![]);
        let mut connection = source.connection().unwrap();

        let mut cursor = TestCursor::new(
            first(&[1, 2, 3], 42),
            CursorOptions::new().with_limit(3),
            RawDocumentDecoder,
            Some(source.clone()),
            Some(&mut connection),
        )
        .unwrap();

        assert_eq!(*shared.killed.lock(), vec![42]);
        assert_eq!(Shared::count(&shared.acquired), 1);
        assert_eq!(Shared::count(&shared.releases), 1);
        let (kill, _) = shared.commands.lock()[0].clone();
        assert_eq!(kill, doc(json!({"killCursors": "coll", "cursors": [42]})));

        assert_eq!(ids(&cursor.next_batch().unwrap()), vec![1, 2, 3]);
        assert!(!cursor.has_next().unwrap());
        assert_eq!(Shared::count(&shared.get_mores), 0);
    }

    #[test]
    fn test_limit_reached_during_fetch_stops_round_trips() {
        let (source, shared) =
            FakeSource::new(LEGACY, vec![batch(&[1, 2], 42), batch(&[3, 4], 42), batch(&[5], 42)]);
        let mut cursor = open(
            first(&[], 42),
            CursorOptions::new().with_limit(3).with_batch_size(2),
            &source,
        );

        assert_eq!(ids(&cursor.next_batch().unwrap()), vec![1, 2]);
        assert_eq!(ids(&cursor.next_batch().unwrap()), vec![3]);
        assert_eq!(BatchCursor::count(&cursor), 3);
        assert!(!cursor.has_next().unwrap());

        assert_eq!(Shared::count(&shared.get_mores), 2);
        assert_eq!(*shared.requested.lock(), vec![2, 1]);
        assert_eq!(*shared.killed.lock(), vec![42]);
        assert_eq!(Shared::count(&shared.releases), 1);
    }

    #[test]
    fn test_get_more_command_shape() {
        let (source, shared) = FakeSource::new(COMMANDS, vec![batch(&[1], 42), batch(&[2], 0)]);
        let mut cursor = open(
            first(&[], 42),
            CursorOptions::new().with_batch_size(-5).with_max_time_ms(100),
            &source,
        );

        cursor.next_batch().unwrap();
        cursor.set_batch_size(0);
        assert_eq!(cursor.batch_size(), 0);
        cursor.next_batch().unwrap();

        let commands = shared.commands.lock();
        assert_eq!(
            commands[0].0,
            doc(json!({"getMore": 42, "collection": "coll", "batchSize": 5, "maxTimeMS": 100}))
        );
        assert_eq!(
            commands[0].0.keys().collect::<Vec<_>>(),
            vec!["getMore", "collection", "batchSize", "maxTimeMS"]
        );
        assert_eq!(
            commands[1].0,
            doc(json!({"getMore": 42, "collection": "coll", "maxTimeMS": 100}))
        );
        assert!(!commands[0].1);
    }

    #[test]
    fn test_cursor_not_found_is_translated() {
        let (source, shared) = FakeSource::new(
            COMMANDS,
            vec![Step::Fail(CommandFailure::new(CURSOR_NOT_FOUND_CODE, "cursor id 42 not found"))],
        );
        let mut cursor = open(first(&[], 42), CursorOptions::new(), &source);

        let err = cursor.has_next().unwrap_err();
        assert!(matches!(err, CursorError::CursorNotFound { ref cursor, .. } if cursor.id() == 42));
        assert_eq!(Shared::count(&shared.acquired), Shared::count(&shared.dropped));
    }

    #[test]
    fn test_other_command_failures_carry_cursor() {
        let (source, _shared) =
            FakeSource::new(COMMANDS, vec![Step::Fail(CommandFailure::new(13, "unauthorized"))]);
        let mut cursor = open(first(&[], 42), CursorOptions::new(), &source);

        match cursor.next_batch().unwrap_err() {
            CursorError::CursorCommand { cursor, code, .. } => {
                assert_eq!(cursor.id(), 42);
                assert_eq!(code, 13);
            }
            other => panic!("unexpected: {other}"),
        }
    }

    #[test]
    fn test_close_kills_and_releases_once() {
        let (source, shared) = FakeSource::new(LEGACY, vec![]);
        let mut cursor = open(first(&[1], 42), CursorOptions::new(), &source);

        cursor.close();
        cursor.close();
        assert!(cursor.is_closed());
        assert_eq!(*shared.killed.lock(), vec![42]);
        assert_eq!(Shared::count(&shared.retains), 1);
        assert_eq!(Shared::count(&shared.releases), 1);

        drop(cursor);
        assert_eq!(Shared::count(&shared.releases), 1);
        assert_eq!(Shared::count(&shared.kills), 1);
    }

    #[test]
    fn test_drop_kills_live_cursor() {
        let (source, shared) = FakeSource::new(LEGACY, vec![]);
        let cursor = open(first(&[1], 42), CursorOptions::new(), &source);

        drop(cursor);
        assert_eq!(*shared.killed.lock(), vec![42]);
        assert_eq!(Shared::count(&shared.kills), 1);
        assert_eq!(Shared::count(&shared.releases), 1);
        assert_eq!(Shared::count(&shared.acquired), Shared::count(&shared.dropped));
    }

    #[test]
    fn test_calls_after_close_fail() {
        let (source, _shared) = FakeSource::new(LEGACY, vec![]);
        let mut cursor = open(first(&[1], 42), CursorOptions::new(), &source);
        cursor.close();

        assert!(matches!(cursor.has_next(), Err(CursorError::IllegalState(_))));
        assert!(matches!(cursor.next_batch(), Err(CursorError::IllegalState(_))));
        assert!(matches!(cursor.try_next(), Err(CursorError::IllegalState(_))));
        assert!(matches!(cursor.server_cursor(), Err(CursorError::IllegalState(_))));
        assert!(matches!(cursor.server_address(), Err(CursorError::IllegalState(_))));
        assert!(matches!(cursor.next(), Some(Err(CursorError::IllegalState(_)))));
    }

    #[test]
    fn test_close_swallows_kill_failure() {
        let (source, shared) = FakeSource::new(COMMANDS, vec![]);
        shared.fail_kills.store(true, Ordering::SeqCst);
        let mut cursor = open(first(&[], 42), CursorOptions::new(), &source);

        cursor.close();
        assert_eq!(Shared::count(&shared.kills), 1);
        assert_eq!(Shared::count(&shared.releases), 1);
        assert_eq!(Shared::count(&shared.acquired), Shared::count(&shared.dropped));
    }

    #[test]
    fn test_kill_failure_during_fetch_propagates() {
        let (source, shared) = FakeSource::new(LEGACY, vec![batch(&[1, 2], 42)]);
        shared.fail_kills.store(true, Ordering::SeqCst);
        let mut cursor = open(first(&[], 42), CursorOptions::new().with_limit(2), &source);

        assert!(matches!(cursor.has_next(), Err(CursorError::Command(_))));
        assert_eq!(Shared::count(&shared.releases), 0);

        cursor.close();
        assert_eq!(Shared::count(&shared.kills), 2);
        assert_eq!(Shared::count(&shared.releases), 1);
    }

    #[test]
    fn test_close_from_another_thread() {
        let (source, shared) = FakeSource::new(LEGACY, vec![]);
        let mut cursor = open(first(&[], 42), CursorOptions::new(), &source);

        let handle = cursor.close_handle();
        std::thread::spawn(move || handle.close()).join().unwrap();

        assert!(cursor.is_closed());
        assert!(matches!(cursor.has_next(), Err(CursorError::IllegalState(_))));
        assert_eq!(*shared.killed.lock(), vec![42]);
        assert_eq!(Shared::count(&shared.releases), 1);
        assert_eq!(Shared::count(&shared.get_mores), 0);
    }

    #[test]
    fn test_close_during_fetch_loop_fails_fast() {
        let (source, shared) = FakeSource::new(LEGACY, vec![batch(&[], 42), batch(&[1], 42)]);
        let mut cursor = open(first(&[], 42), CursorOptions::new(), &source);
        *shared.close_during_get_more.lock() = Some(cursor.close_handle());

        assert!(matches!(cursor.has_next(), Err(CursorError::IllegalState(_))));
        assert_eq!(Shared::count(&shared.get_mores), 1);
        assert_eq!(Shared::count(&shared.releases), 1);
    }

    #[test]
    fn test_exhaust_pins_one_connection() {
        let (source, shared) = FakeSource::new(
            EXHAUST,
            vec![batch(&[1], 42), batch(&[2], 42), batch(&[3], 0)],
        );
        let cursor = open(first(&[], 42), CursorOptions::new().with_exhaust(true), &source);

        let batches: Vec<Vec<i64>> = cursor.map(|b| ids(&b.unwrap())).collect();
        assert_eq!(batches, vec![vec![1], vec![2], vec![3]]);
        assert_eq!(Shared::count(&shared.get_mores), 3);
        assert_eq!(Shared::count(&shared.acquired), 1);
        assert_eq!(Shared::count(&shared.dropped), 1);
        assert!(shared.commands.lock().iter().all(|(_, exhaust)| *exhaust));
        assert_eq!(Shared::count(&shared.releases), 1);
    }

    #[test]
    fn test_exhaust_on_old_server_acquires_per_round_trip() {
        let (source, shared) = FakeSource::new(COMMANDS, vec![batch(&[1], 42), batch(&[2], 0)]);
        let mut cursor = open(first(&[], 42), CursorOptions::new().with_exhaust(true), &source);

        cursor.next_batch().unwrap();
        assert_eq!(Shared::count(&shared.acquired), 1);
        assert_eq!(Shared::count(&shared.dropped), 1);
        cursor.next_batch().unwrap();
        assert_eq!(Shared::count(&shared.acquired), 2);
        assert_eq!(Shared::count(&shared.dropped), 2);
    }

    #[test]
    fn test_close_releases_pinned_connection() {
        let (source, shared) = FakeSource::new(EXHAUST, vec![batch(&[1], 42)]);
        let mut cursor = open(first(&[], 42), CursorOptions::new().with_exhaust(true), &source);

        cursor.next_batch().unwrap();
        assert_eq!(Shared::count(&shared.dropped), 0);

        cursor.close();
        assert_eq!(*shared.killed.lock(), vec![42]);
        assert_eq!(Shared::count(&shared.acquired), Shared::count(&shared.dropped));
        assert_eq!(Shared::count(&shared.releases), 1);
    }

    #[test]
    fn test_serde_decoder_batches() {
        #[derive(Debug, serde::Deserialize, PartialEq)]
        struct Row {
            _id: i64,
        }

        let (source, _shared) = FakeSource::new(COMMANDS, vec![batch(&[2, 3], 0)]);
        let initial = first(&[1], 42)
            .try_map(|d| SerdeDecoder::<Row>::new().decode(d))
            .unwrap();
        let mut cursor = BatchCursor::new(
            initial,
            CursorOptions::new(),
            SerdeDecoder::<Row>::new(),
            Some(source),
            None,
        )
        .unwrap();

        assert_eq!(cursor.next_batch().unwrap(), vec![Row { _id: 1 }]);
        assert_eq!(cursor.next_batch().unwrap(), vec![Row { _id: 2 }, Row { _id: 3 }]);
        assert!(matches!(cursor.next_batch(), Err(CursorError::NoSuchElement)));
    }

    proptest! {
        #[test]
        fn prop_limit_bounds_count(
            limit in 1i32..20,
            batch_size in -4i32..5,
            sizes in prop::collection::vec(0usize..6, 1..12),
            capability in prop::sample::select(vec![LEGACY, COMMANDS]),
        ) {
            let mut next_id = 0i64;
            let last = sizes.len() - 1;
            let script = sizes
                .iter()
                .enumerate()
                .map(|(i, &n)| {
                    let values: Vec<i64> = (0..n as i64).map(|_| { next_id += 1; next_id }).collect();
                    batch(&values, if i == last { 0 } else { 42 })
                })
                .collect();
            let (source, shared) = FakeSource::new(capability, script);
            let mut cursor = open(
                first(&[], 42),
                CursorOptions::new().with_limit(limit).with_batch_size(batch_size),
                &source,
            );

            let mut returned = 0;
            while cursor.has_next().unwrap() {
                returned += cursor.next_batch().unwrap().len() as i32;
            }
            prop_assert!(returned <= limit);
            prop_assert_eq!(returned, BatchCursor::count(&cursor));

            let round_trips = Shared::count(&shared.get_mores);
            prop_assert!(!cursor.has_next().unwrap());
            prop_assert!(cursor.try_next().unwrap().is_none());
            prop_assert_eq!(Shared::count(&shared.get_mores), round_trips);

            cursor.close();
            prop_assert_eq!(Shared::count(&shared.retains), 1);
            prop_assert_eq!(Shared::count(&shared.releases), 1);
        }
    }
}
