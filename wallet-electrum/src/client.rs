//! The Electrum client: a single background task owns the socket, a pending
//! map correlates responses, and subscriptions fan out through broadcast
//! buses.

use std::{
    collections::{HashMap, HashSet},
    io,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use serde_json::{json, Value};
use thiserror::Error;
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader},
    net::TcpStream,
    sync::{mpsc, oneshot},
};
use tokio_rustls::TlsConnector;
use tracing::{debug, info, warn};
use wallet_btc::{tx::Transaction, Network, Txid};
use wallet_tokio::{bus::Bus, shutdown::ShutdownSignal, task::NamedTask};

use crate::{
    scripthash,
    types::{
        AddressStatus, Balance, BalanceUpdate, ConnectionState, HeaderInfo,
        HistoryItem, MerkleInfo, TxUpdate, UnspentItem,
    },
    wire::{self, Message, Request},
};

/// Every request fails with [`Error::Timeout`] after this long.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(12);

/// Delay before reconnecting after a failed or dropped connection.
pub const RECONNECT_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    #[error("not connected to an Electrum server")]
    NotConnected,
    #[error("connection failed: {0}")]
    ConnectionFailed(String),
    #[error("request timed out")]
    Timeout,
    #[error("server error: {0}")]
    ServerError(Value),
}

/// Where and how to connect.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub ssl: bool,
    pub network: Network,
}

/// Events published by the client. Clone a bus to subscribe from anywhere.
pub struct ClientEvents {
    pub connection_state: Bus<ConnectionState>,
    pub block_height: Bus<u32>,
    pub address_status: Bus<AddressStatus>,
    pub balance_update: Bus<BalanceUpdate>,
    pub tx_update: Bus<TxUpdate>,
}

impl ClientEvents {
    fn new() -> Self {
        Self {
            connection_state: Bus::new(),
            block_height: Bus::new(),
            address_status: Bus::new(),
            balance_update: Bus::new(),
            tx_update: Bus::new(),
        }
    }
}

/// Messages from the public API to the connection task.
enum OutMsg {
    /// A serialized request line. `id` lets the task fail the pending entry
    /// if the line cannot be written.
    Line { id: u64, line: String },
    /// Tear down the current connection and reconnect with new settings.
    Reconfigure(ServerConfig),
}

struct SubsState {
    network: Network,
    connected: bool,
    tip_height: Option<u32>,
    scripthash_by_address: HashMap<String, String>,
    address_by_scripthash: HashMap<String, String>,
    /// Txids last seen in each subscribed address's history, for diffing.
    address_txids: HashMap<String, HashSet<Txid>>,
    /// Txids we synthesize confirmation updates for.
    tracked: HashMap<Txid, Option<u32>>,
}

struct Inner {
    next_id: AtomicU64,
    pending: Mutex<HashMap<u64, oneshot::Sender<Result<Value, Error>>>>,
    subs: Mutex<SubsState>,
    out_tx: mpsc::UnboundedSender<OutMsg>,
    events: ClientEvents,
}

/// Handle to the Electrum client. Cheap to clone; the connection itself lives
/// on the task returned by [`ElectrumClient::new`].
#[derive(Clone)]
pub struct ElectrumClient {
    inner: Arc<Inner>,
}

impl ElectrumClient {
    /// Create the client and its connection task. The task runs until
    /// `shutdown` fires.
    pub fn new(
        config: ServerConfig,
        shutdown: ShutdownSignal,
    ) -> (Self, NamedTask<()>) {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let inner = Arc::new(Inner {
            next_id: AtomicU64::new(0),
            pending: Mutex::new(HashMap::new()),
            subs: Mutex::new(SubsState {
                network: config.network,
                connected: false,
                tip_height: None,
                scripthash_by_address: HashMap::new(),
                address_by_scripthash: HashMap::new(),
                address_txids: HashMap::new(),
                tracked: HashMap::new(),
            }),
            out_tx,
            events: ClientEvents::new(),
        });

        let client = Self { inner };
        let task = NamedTask::spawn(
            "electrum-conn",
            conn_task(client.clone(), out_rx, config, shutdown),
        );
        (client, task)
    }

    pub fn events(&self) -> &ClientEvents {
        &self.inner.events
    }

    pub fn network(&self) -> Network {
        self.inner.subs.lock().unwrap().network
    }

    pub fn is_connected(&self) -> bool {
        self.inner.subs.lock().unwrap().connected
    }

    pub fn tip_height(&self) -> Option<u32> {
        self.inner.subs.lock().unwrap().tip_height
    }

    /// Apply new server settings: the current connection is torn down and
    /// re-established against the new host.
    pub fn update_server(&self, config: ServerConfig) {
        self.inner.subs.lock().unwrap().network = config.network;
        let _ = self.inner.out_tx.send(OutMsg::Reconfigure(config));
    }

    /// Track txids so header updates synthesize [`TxUpdate`] events for them.
    pub fn track_txids(&self, txids: impl IntoIterator<Item = (Txid, Option<u32>)>) {
        let mut subs = self.inner.subs.lock().unwrap();
        for (txid, height) in txids {
            subs.tracked.insert(txid, height);
        }
    }

    /// Subscribe to status changes of `address`.
    ///
    /// The subscription is registered locally even while disconnected and is
    /// (re-)established on every connect.
    pub async fn subscribe_address(&self, address: &str) -> Result<(), Error> {
        let sh = {
            let mut subs = self.inner.subs.lock().unwrap();
            match subs.scripthash_by_address.get(address) {
                Some(sh) => sh.clone(),
                None => {
                    let sh = scripthash::of_address(address, subs.network)
                        .map_err(|err| Error::InvalidRequest(err.to_string()))?;
                    subs.scripthash_by_address
                        .insert(address.to_owned(), sh.clone());
                    subs.address_by_scripthash
                        .insert(sh.clone(), address.to_owned());
                    sh
                }
            }
        };

        match self
            .call("blockchain.scripthash.subscribe", vec![json!(sh)])
            .await
        {
            Ok(status) => {
                if !status.is_null() {
                    // The address already has history; refresh immediately.
                    self.spawn_status_refresh(sh);
                }
                Ok(())
            }
            // Not connected yet: the connect path resubscribes everything.
            Err(Error::NotConnected) => Ok(()),
            Err(err) => Err(err),
        }
    }

    // --- RPC wrappers --- //

    pub async fn server_features(&self) -> Result<Value, Error> {
        self.call("server.features", vec![]).await
    }

    pub async fn get_balance(&self, address: &str) -> Result<Balance, Error> {
        let sh = self.scripthash_for(address)?;
        let value = self
            .call("blockchain.scripthash.get_balance", vec![json!(sh)])
            .await?;
        from_value(value)
    }

    pub async fn get_history(&self, address: &str) -> Result<Vec<HistoryItem>, Error> {
        let sh = self.scripthash_for(address)?;
        let value = self
            .call("blockchain.scripthash.get_history", vec![json!(sh)])
            .await?;
        from_value(value)
    }

    pub async fn listunspent(&self, address: &str) -> Result<Vec<UnspentItem>, Error> {
        let sh = self.scripthash_for(address)?;
        let value = self
            .call("blockchain.scripthash.listunspent", vec![json!(sh)])
            .await?;
        from_value(value)
    }

    /// Raw transaction hex.
    pub async fn get_transaction_hex(&self, txid: Txid) -> Result<String, Error> {
        let value = self
            .call("blockchain.transaction.get", vec![json!(txid.to_string())])
            .await?;
        from_value(value)
    }

    /// Decoded transaction.
    pub async fn get_transaction(&self, txid: Txid) -> Result<Transaction, Error> {
        let raw = self.get_transaction_hex(txid).await?;
        Transaction::decode_hex(&raw)
            .map_err(|err| Error::InvalidResponse(format!("tx {txid}: {err}")))
    }

    /// Server-decoded (verbose) transaction.
    pub async fn get_transaction_verbose(&self, txid: Txid) -> Result<Value, Error> {
        self.call(
            "blockchain.transaction.get",
            vec![json!(txid.to_string()), json!(true)],
        )
        .await
    }

    /// Broadcast a signed transaction; returns the txid the server accepted.
    pub async fn broadcast(&self, tx: &Transaction) -> Result<Txid, Error> {
        let tx_hex = hex::encode(tx.serialize());
        let value = self
            .call("blockchain.transaction.broadcast", vec![json!(tx_hex)])
            .await?;
        let returned: String = from_value(value)?;
        returned
            .parse()
            .map_err(|_| Error::InvalidResponse(format!("bad txid: {returned}")))
    }

    /// Intra-block position of a confirmed transaction.
    pub async fn get_transaction_position(
        &self,
        txid: Txid,
        height: u32,
    ) -> Result<u32, Error> {
        let value = self
            .call(
                "blockchain.transaction.get_merkle",
                vec![json!(txid.to_string()), json!(height)],
            )
            .await?;
        let merkle: MerkleInfo = from_value(value)?;
        Ok(merkle.pos)
    }

    /// Raw 80-byte block header.
    pub async fn block_header(&self, height: u32) -> Result<Vec<u8>, Error> {
        let value = self
            .call("blockchain.block.header", vec![json!(height)])
            .await?;
        let header_hex: String = from_value(value)?;
        let header = hex::decode(&header_hex)
            .map_err(|_| Error::InvalidResponse("non-hex block header".to_owned()))?;
        if header.len() < 80 {
            return Err(Error::InvalidResponse(format!(
                "short block header: {} bytes",
                header.len()
            )));
        }
        Ok(header)
    }

    /// The block's unix timestamp: header bytes 68..72, little endian.
    pub async fn block_header_timestamp(&self, height: u32) -> Result<u32, Error> {
        let header = self.block_header(height).await?;
        let bytes: [u8; 4] = header[68..72].try_into().expect("length checked");
        Ok(u32::from_le_bytes(bytes))
    }

    /// Fee estimate in BTC/kB for confirmation within `blocks` blocks.
    /// Servers return `-1` when they have no estimate.
    pub async fn estimate_fee(&self, blocks: u32) -> Result<f64, Error> {
        let value = self.call("blockchain.estimatefee", vec![json!(blocks)]).await?;
        from_value(value)
    }

    // --- internals --- //

    fn scripthash_for(&self, address: &str) -> Result<String, Error> {
        let subs = self.inner.subs.lock().unwrap();
        if let Some(sh) = subs.scripthash_by_address.get(address) {
            return Ok(sh.clone());
        }
        scripthash::of_address(address, subs.network)
            .map_err(|err| Error::InvalidRequest(err.to_string()))
    }

    /// Send one request and await its response.
    async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value, Error> {
        if !self.is_connected() {
            return Err(Error::NotConnected);
        }

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.inner.pending.lock().unwrap().insert(id, tx);

        let line = Request::new(id, method, &params).to_line();
        if self.inner.out_tx.send(OutMsg::Line { id, line }).is_err() {
            self.inner.pending.lock().unwrap().remove(&id);
            return Err(Error::ConnectionFailed("connection task gone".to_owned()));
        }

        match tokio::time::timeout(REQUEST_TIMEOUT, rx).await {
            Ok(Ok(result)) => result,
            // Sender dropped: the connection died with our request in flight.
            Ok(Err(_)) => Err(Error::ConnectionFailed("connection closed".to_owned())),
            Err(_) => {
                // Remove the pending entry exactly once; the response, if it
                // ever arrives, is dropped without side effects.
                self.inner.pending.lock().unwrap().remove(&id);
                Err(Error::Timeout)
            }
        }
    }

    /// Complete a pending request from a wire response.
    fn complete(&self, id: u64, result: Result<Value, Value>) {
        let sender = self.inner.pending.lock().unwrap().remove(&id);
        match sender {
            Some(sender) => {
                let _ = sender.send(result.map_err(Error::ServerError));
            }
            None => debug!("response for unknown or timed-out request id={id}"),
        }
    }

    /// Fail a pending request that never made it onto the wire.
    fn fail_request(&self, id: u64, error: Error) {
        if let Some(sender) = self.inner.pending.lock().unwrap().remove(&id) {
            let _ = sender.send(Err(error));
        }
    }

    /// Drop every pending request; callers observe `ConnectionFailed`.
    fn fail_pending(&self) {
        self.inner.pending.lock().unwrap().clear();
    }

    fn set_connected(&self, connected: bool) {
        self.inner.subs.lock().unwrap().connected = connected;
    }

    fn dispatch_line(&self, line: &str) {
        match wire::parse_line(line) {
            Ok(Some(Message::Response { id, result })) => self.complete(id, result),
            Ok(Some(Message::Notification { method, params })) =>
                self.handle_notification(&method, params),
            Ok(None) => debug!("ignoring unclassifiable line"),
            Err(err) => warn!("malformed line from server: {err}"),
        }
    }

    fn handle_notification(&self, method: &str, params: Value) {
        match method {
            "blockchain.headers.subscribe" => {
                let info: Result<(HeaderInfo,), _> = serde_json::from_value(params);
                match info {
                    Ok((info,)) => self.apply_header(&info),
                    Err(err) => warn!("bad headers notification: {err}"),
                }
            }
            "blockchain.scripthash.subscribe" => {
                // params: [scripthash, status]
                let sh = params
                    .get(0)
                    .and_then(Value::as_str)
                    .map(str::to_owned);
                match sh {
                    Some(sh) => self.spawn_status_refresh(sh),
                    None => warn!("bad scripthash notification"),
                }
            }
            other => debug!("ignoring notification: {other}"),
        }
    }

    /// Apply a new chain tip: publish the height and refresh confirmation
    /// counts for every tracked confirmed txid.
    fn apply_header(&self, info: &HeaderInfo) {
        let height = match u32::try_from(info.height) {
            Ok(h) => h,
            Err(_) => {
                warn!("server sent nonsense tip height {}", info.height);
                return;
            }
        };

        let updates: Vec<TxUpdate> = {
            let mut subs = self.inner.subs.lock().unwrap();
            subs.tip_height = Some(height);
            subs.tracked
                .iter()
                .filter_map(|(txid, tx_height)| {
                    tx_height.map(|h| TxUpdate {
                        txid: *txid,
                        height: Some(h),
                        confirmations: confirmations(height, Some(h)),
                    })
                })
                .collect()
        };

        self.inner.events.block_height.publish(height);
        for update in updates {
            self.inner.events.tx_update.publish(update);
        }
    }

    /// Refresh balance + history for the address behind `scripthash`,
    /// publishing status/balance events and a [`TxUpdate`] per newly learned
    /// txid. Runs detached so the read loop never blocks on RPC.
    fn spawn_status_refresh(&self, scripthash: String) {
        let client = self.clone();
        NamedTask::spawn("electrum-status-refresh", async move {
            if let Err(err) = client.refresh_address_status(&scripthash).await {
                warn!("status refresh for {scripthash} failed: {err}");
            }
        })
        .detach();
    }

    async fn refresh_address_status(&self, sh: &str) -> Result<(), Error> {
        let address = {
            let subs = self.inner.subs.lock().unwrap();
            match subs.address_by_scripthash.get(sh) {
                Some(address) => address.clone(),
                None => {
                    debug!("status for unknown scripthash {sh}");
                    return Ok(());
                }
            }
        };

        let balance = self.get_balance(&address).await?;
        let history = self.get_history(&address).await?;

        self.inner.events.address_status.publish(AddressStatus {
            address: address.clone(),
            has_history: !history.is_empty(),
        });
        self.inner.events.balance_update.publish(BalanceUpdate {
            address: address.clone(),
            confirmed_sats: balance.confirmed,
            unconfirmed_sats: balance.unconfirmed,
        });

        // Diff the history against what we knew for this address and track
        // height changes.
        let (tip, changed) = {
            let mut subs = self.inner.subs.lock().unwrap();
            let known = subs.address_txids.entry(address.clone()).or_default();
            let mut changed: Vec<(Txid, Option<u32>, bool)> = Vec::new();
            for item in &history {
                let height = item.confirmed_height();
                let is_new = known.insert(item.tx_hash);
                changed.push((item.tx_hash, height, is_new));
            }
            let mut height_changed = Vec::new();
            for (txid, height, is_new) in changed {
                let previous = subs.tracked.insert(txid, height);
                if is_new || previous != Some(height) {
                    height_changed.push((txid, height));
                }
            }
            (subs.tip_height, height_changed)
        };

        for (txid, height) in changed {
            // Best-effort verbose fetch so the server's view (fees,
            // confirmations) is warm before consumers react.
            if let Err(err) = self.get_transaction_verbose(txid).await {
                debug!("verbose fetch for {txid} failed: {err}");
            }
            self.inner.events.tx_update.publish(TxUpdate {
                txid,
                height,
                confirmations: tip.map_or(0, |tip| confirmations(tip, height)),
            });
        }

        Ok(())
    }
}

/// `max(0, tip - height + 1)`, or zero for mempool transactions.
pub fn confirmations(tip: u32, height: Option<u32>) -> u32 {
    match height {
        Some(h) if h <= tip => tip - h + 1,
        _ => 0,
    }
}

// --- connection task --- //

trait AsyncStream: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> AsyncStream for T {}

enum Exit {
    Shutdown,
    Reconfigure(ServerConfig),
    Lost(String),
}

async fn conn_task(
    client: ElectrumClient,
    mut out_rx: mpsc::UnboundedReceiver<OutMsg>,
    mut config: ServerConfig,
    mut shutdown: ShutdownSignal,
) {
    let events = &client.inner.events;
    loop {
        events.connection_state.publish(ConnectionState::Connecting);
        info!("connecting to {}:{} (ssl={})", config.host, config.port, config.ssl);

        let connected =
            tokio::time::timeout(REQUEST_TIMEOUT, connect_transport(&config)).await;
        match connected {
            Ok(Ok(stream)) => {
                client.set_connected(true);
                events.connection_state.publish(ConnectionState::Connected);

                // Re-establish the header subscription and every scripthash
                // subscription off the read loop.
                NamedTask::spawn("electrum-resubscribe", resubscribe(client.clone()))
                    .detach();

                let exit = drive(&client, stream, &mut out_rx, &mut shutdown).await;

                client.set_connected(false);
                client.fail_pending();

                match exit {
                    Exit::Shutdown => {
                        events.connection_state.publish(ConnectionState::Disconnected);
                        return;
                    }
                    Exit::Reconfigure(new_config) => {
                        events.connection_state.publish(ConnectionState::Disconnected);
                        config = new_config;
                        continue;
                    }
                    Exit::Lost(reason) => {
                        warn!("connection lost: {reason}");
                        events
                            .connection_state
                            .publish(ConnectionState::Failed(reason));
                    }
                }
            }
            Ok(Err(err)) => {
                client.fail_pending();
                events
                    .connection_state
                    .publish(ConnectionState::Failed(err.to_string()));
            }
            Err(_) => {
                client.fail_pending();
                events
                    .connection_state
                    .publish(ConnectionState::Failed("connect timed out".to_owned()));
            }
        }

        // Wait out the reconnect delay, still servicing control messages.
        let mut delay = Box::pin(tokio::time::sleep(RECONNECT_DELAY));
        loop {
            tokio::select! {
                () = shutdown.recv() => {
                    events.connection_state.publish(ConnectionState::Disconnected);
                    return;
                }
                msg = out_rx.recv() => match msg {
                    Some(OutMsg::Reconfigure(new_config)) => {
                        config = new_config;
                        break;
                    }
                    Some(OutMsg::Line { id, .. }) => {
                        // Requests racing a disconnect fail fast.
                        client.fail_request(id, Error::NotConnected);
                    }
                    None => return,
                },
                () = &mut delay => break,
            }
        }
    }
}

/// Pump the socket until it dies, a reconfigure arrives, or shutdown.
async fn drive(
    client: &ElectrumClient,
    stream: Box<dyn AsyncStream>,
    out_rx: &mut mpsc::UnboundedReceiver<OutMsg>,
    shutdown: &mut ShutdownSignal,
) -> Exit {
    let (read_half, mut write_half) = tokio::io::split(stream);
    let mut lines = BufReader::new(read_half).lines();

    loop {
        tokio::select! {
            () = shutdown.recv() => return Exit::Shutdown,

            msg = out_rx.recv() => match msg {
                Some(OutMsg::Line { id, line }) => {
                    if let Err(err) = write_half.write_all(line.as_bytes()).await {
                        client.fail_request(
                            id,
                            Error::ConnectionFailed(err.to_string()),
                        );
                        return Exit::Lost(format!("write failed: {err}"));
                    }
                }
                Some(OutMsg::Reconfigure(config)) => return Exit::Reconfigure(config),
                None => return Exit::Shutdown,
            },

            line = lines.next_line() => match line {
                Ok(Some(line)) => client.dispatch_line(&line),
                Ok(None) => return Exit::Lost("server closed the connection".to_owned()),
                Err(err) => return Exit::Lost(format!("read failed: {err}")),
            },
        }
    }
}

async fn resubscribe(client: ElectrumClient) {
    // Header subscription first: the result carries the current tip.
    match client.call("blockchain.headers.subscribe", vec![]).await {
        Ok(value) => match serde_json::from_value::<HeaderInfo>(value) {
            Ok(info) => client.apply_header(&info),
            Err(err) => warn!("bad headers.subscribe result: {err}"),
        },
        Err(err) => {
            warn!("headers.subscribe failed: {err}");
            return;
        }
    }

    let scripthashes: Vec<String> = {
        let subs = client.inner.subs.lock().unwrap();
        subs.address_by_scripthash.keys().cloned().collect()
    };
    for sh in scripthashes {
        match client
            .call("blockchain.scripthash.subscribe", vec![json!(sh)])
            .await
        {
            Ok(status) if !status.is_null() => client.spawn_status_refresh(sh),
            Ok(_) => (),
            Err(err) => warn!("scripthash resubscribe failed: {err}"),
        }
    }
}

async fn connect_transport(config: &ServerConfig) -> io::Result<Box<dyn AsyncStream>> {
    let tcp = TcpStream::connect((config.host.as_str(), config.port)).await?;
    if !config.ssl {
        return Ok(Box::new(tcp));
    }

    let mut roots = rustls::RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let tls_config = rustls::ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    let connector = TlsConnector::from(Arc::new(tls_config));
    let server_name = rustls::pki_types::ServerName::try_from(config.host.clone())
        .map_err(|err| io::Error::new(io::ErrorKind::InvalidInput, err))?;
    let stream = connector.connect(server_name, tcp).await?;
    Ok(Box::new(stream))
}

fn from_value<T: serde::de::DeserializeOwned>(value: Value) -> Result<T, Error> {
    serde_json::from_value(value).map_err(|err| Error::InvalidResponse(err.to_string()))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn confirmation_math() {
        assert_eq!(confirmations(100, Some(100)), 1);
        assert_eq!(confirmations(105, Some(100)), 6);
        assert_eq!(confirmations(100, Some(105)), 0);
        assert_eq!(confirmations(100, None), 0);
    }
}
