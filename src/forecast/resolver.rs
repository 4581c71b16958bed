//! Token symbol resolution.
//!
//! Lookup order: the static known-token table, the per-instance cache, then
//! an ERC-20 `symbol()` call through [`SymbolRpc`]. RPC calls are spaced by a
//! [`RateLimiter`] and retried with a [`RetryPolicy`]. Failures never
//! propagate; they render as the first 8 characters of the address plus
//! `...`.

use crate::forecast::clock::{Clock, RateLimiter, RetryPolicy};
use crate::forecast::config::ResolverConfig;
use crate::forecast::error::{PipelineError, Result};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// `symbol()` selector.
const SYMBOL_SELECTOR: &str = "0x95d89b41";

lazy_static::lazy_static! {
    static ref KNOWN_TOKENS: HashMap<String, &'static str> = [
        ("0xdAC17F958D2ee523a2206206994597C13D831ec7", "USDT"),
        ("0xA0b86991c31D6832c4b0B9e26cB4171d43c4a9a4", "USDC"),
        ("0x6B175474E89094C44Da98b954EedeAC495271d0F", "DAI"),
        ("0xC02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2", "WETH"),
        ("0x2260FAC5E5542a773Aa44fBCfeDf7C193bc2C599", "WBTC"),
        ("0x83F20F44975D03b1b09e64809B757c47f942BEeA", "SDAI"),
        ("0x9D39A5DE30e57443BfF2A8307A4256c8797A3497", "SUSDE"),
        ("0x4c9EDD5852cd905f086C759E8383e09bff1E68B3", "USDE"),
        ("0x6c3ea9036406852006290770BEdFcAbA0e23A0e8", "PYUSD"),
        ("0x99D8a9C45b2ecA8864373A26D1459e3Dff1e17F3", "MIM"),
        ("0x853d955aCEf822Db058eb8505911ED77F175b99e", "FRAX"),
        ("0xf939E0A03FB07F59A73314E73794Be0E57ac1b4E", "crvUSD"),
        ("0xdC035D45d973E3EC169d2276DDab16f1e407384F", "USDS"),
        ("0x40D16FC0246aD3160Ccc09B8D0D3A2cD28aE6C2f", "GHO"),
        ("0x57Ab1ec28D129707052df4dF418D58a2D46d5f51", "sY"),
        ("0x9fE46736679d2D9a65F0992F2272dE9f3c7fa6e0", "USD3"),
        ("0x0C10bF8FcB7Bf5412187A595ab97a3609160b5c6", "USDD"),
        ("0x056Fd409E1d7A124BD7017459dFEa2F387b6d5Cd", "GUSD"),
        ("0xFd086bC7CD5C481DCC9C85ebE478A1C0b69FCbb9", "USDT"),
        ("0x8f3Cf7ad23Cd3CaDbD9735AFf958023239c6A063", "DAI"),
        ("0xae78736Cd615f374D3085123A210448E74Fc6393", "rETH"),
        ("0x7f39C581F595B53c5cb19bD0b3f8dA6c935E2Ca0", "wstETH"),
        ("0xA35b1B31Ce002FBF2058D22F30f95D405200A15b", "ETHx"),
    ]
    .iter()
    .map(|(addr, sym)| (addr.to_lowercase(), *sym))
    .collect();
}

/// Placeholder for an address whose symbol could not be resolved.
pub fn unknown_symbol(address: &str) -> String {
    format!("{}...", address.chars().take(8).collect::<String>())
}

fn is_address(token: &str) -> bool {
    token.len() == 42
        && token.starts_with("0x")
        && token[2..].chars().all(|c| c.is_ascii_hexdigit())
}

/// Decode an `eth_call` return of `symbol()`: ABI `string` or `bytes32`.
pub fn decode_symbol(hex_result: &str) -> Option<String> {
    let bytes = hex::decode(hex_result.trim().trim_start_matches("0x")).ok()?;

    let word = |i: usize| -> Option<u64> {
        let chunk = bytes.get(i * 32..(i + 1) * 32)?;
        if chunk[..24].iter().any(|b| *b != 0) {
            return None;
        }
        let mut buf = [0u8; 8];
        buf.copy_from_slice(&chunk[24..]);
        Some(u64::from_be_bytes(buf))
    };

    let raw: Vec<u8> = if bytes.len() >= 64 && word(0) == Some(32) {
        let len = usize::try_from(word(1)?).ok()?;
        let end = 64usize.checked_add(len)?;
        bytes.get(64..end)?.to_vec()
    } else if bytes.len() == 32 {
        bytes.iter().copied().take_while(|b| *b != 0).collect()
    } else {
        return None;
    };

    let symbol = String::from_utf8(raw).ok()?;
    let symbol = symbol.trim_matches(char::from(0)).trim().to_string();
    (!symbol.is_empty()).then_some(symbol)
}

/// Remote `symbol()` lookup.
pub trait SymbolRpc: Send + Sync {
    /// `Ok(None)` when the call succeeded but returned nothing usable.
    fn symbol(&self, token_address: &str) -> Result<Option<String>>;
}

/// JSON-RPC `eth_call` over a blocking HTTP client.
pub struct HttpSymbolRpc {
    client: reqwest::blocking::Client,
    endpoint: String,
}

impl HttpSymbolRpc {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PipelineError::external(format!("building RPC client: {}", e)))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }
}

impl SymbolRpc for HttpSymbolRpc {
    fn symbol(&self, token_address: &str) -> Result<Option<String>> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "eth_call",
            "params": [{ "to": token_address, "data": SYMBOL_SELECTOR }, "latest"],
        });

        let response: Value = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .and_then(|r| r.error_for_status())
            .and_then(|r| r.json())
            .map_err(|e| PipelineError::external(format!("eth_call symbol() on {}: {}", token_address, e)))?;

        if let Some(err) = response.get("error") {
            return Err(PipelineError::external(format!(
                "eth_call symbol() on {}: {}",
                token_address, err
            )));
        }
        Ok(response
            .get("result")
            .and_then(Value::as_str)
            .and_then(decode_symbol))
    }
}

// =============================================================================
// RESOLVER
// =============================================================================

pub struct TokenResolver {
    rpc: Option<Arc<dyn SymbolRpc>>,
    limiter: RateLimiter,
    retry: RetryPolicy,
    clock: Arc<dyn Clock>,
    cache: Mutex<HashMap<String, String>>,
}

impl TokenResolver {
    pub fn new(
        rpc: Option<Arc<dyn SymbolRpc>>,
        min_interval: Duration,
        retry: RetryPolicy,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            rpc,
            limiter: RateLimiter::new(clock.clone(), min_interval),
            retry,
            clock,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Known-token table only; everything else renders as unknown.
    pub fn offline(clock: Arc<dyn Clock>) -> Self {
        Self::new(None, Duration::ZERO, RetryPolicy::no_retry(), clock)
    }

    /// HTTP-backed resolver. A client that cannot be built degrades to offline.
    pub fn from_config(config: &ResolverConfig, clock: Arc<dyn Clock>) -> Self {
        let rpc: Option<Arc<dyn SymbolRpc>> =
            match HttpSymbolRpc::new(config.endpoint(), config.request_timeout()) {
                Ok(rpc) => Some(Arc::new(rpc)),
                Err(e) => {
                    warn!("Symbol RPC unavailable, resolving offline: {}", e);
                    None
                }
            };
        Self::new(rpc, config.min_interval(), config.retry_policy(), clock)
    }

    /// Symbol for a token. Tokens that are not addresses are taken as symbols already.
    pub fn resolve(&self, token: &str) -> String {
        if let Some(symbol) = KNOWN_TOKENS.get(&token.to_lowercase()) {
            return symbol.to_string();
        }
        if !is_address(token) {
            return token.to_string();
        }
        if let Some(symbol) = self.cache.lock().get(token) {
            return symbol.clone();
        }

        let symbol = match &self.rpc {
            Some(rpc) => {
                let result = self.retry.run(self.clock.as_ref(), token, || {
                    self.limiter.acquire();
                    rpc.symbol(token)
                });
                match result {
                    Ok(Some(symbol)) => symbol,
                    Ok(None) => {
                        debug!("Empty symbol() result for {}", token);
                        unknown_symbol(token)
                    }
                    Err(e) => {
                        warn!("Symbol lookup failed for {}: {}", unknown_symbol(token), e);
                        unknown_symbol(token)
                    }
                }
            }
            None => unknown_symbol(token),
        };

        self.cache.lock().insert(token.to_string(), symbol.clone());
        symbol
    }

    /// Resolved symbols for a token set, in token order.
    pub fn resolve_all(&self, tokens: &BTreeSet<String>) -> Vec<String> {
        tokens.iter().map(|t| self.resolve(t)).collect()
    }

    pub fn cached(&self) -> usize {
        self.cache.lock().len()
    }
}
