//! Chain-kind-tagged query model: block range, log filters, field projection

use alloy::primitives::{Address, B256};
use serde::{Deserialize, Serialize};

/// A range query, tagged by chain kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Query {
    Evm(evm::Query),
}

pub mod evm {
    use super::*;

    /// EVM range query. `to_block` is exclusive; `None` means unbounded
    /// (tail the chain until cancelled).
    #[derive(Debug, Clone, Default, Serialize, Deserialize)]
    #[serde(default)]
    pub struct Query {
        pub from_block: u64,
        pub to_block: Option<u64>,
        /// Emit a `blocks` table even when log filters would otherwise
        /// restrict the fetch to matching blocks only.
        pub include_all_blocks: bool,
        pub logs: Vec<LogRequest>,
        pub fields: Fields,
    }

    impl Query {
        /// Reject ranges the engine cannot serve.
        pub fn validate(&self) -> Result<(), String> {
            if let Some(to) = self.to_block {
                if to < self.from_block {
                    return Err(format!(
                        "to_block {to} is below from_block {}",
                        self.from_block
                    ));
                }
            }
            if !self.fields.block.any()
                && !self.fields.transaction.any()
                && !self.fields.log.any()
            {
                return Err("no fields selected for any table".to_string());
            }
            Ok(())
        }
    }

    /// One log filter: address alternatives plus up to 4 topic slots.
    /// An empty slot matches anything; slot 0 conventionally holds
    /// event selectors.
    #[derive(Debug, Clone, Default, Serialize, Deserialize)]
    #[serde(default)]
    pub struct LogRequest {
        pub address: Vec<Address>,
        pub topics: [Vec<B256>; 4],
    }

    impl LogRequest {
        pub fn topic0(selectors: Vec<B256>) -> Self {
            Self {
                topics: [selectors, Vec::new(), Vec::new(), Vec::new()],
                ..Default::default()
            }
        }
    }

    /// Per-record-kind projection: which attributes are materialized.
    /// Unselected attributes never appear in emitted batches.
    #[derive(Debug, Clone, Default, Serialize, Deserialize)]
    #[serde(default)]
    pub struct Fields {
        pub block: BlockFields,
        pub transaction: TransactionFields,
        pub log: LogFields,
    }

    #[derive(Debug, Clone, Default, Serialize, Deserialize)]
    #[serde(default)]
    pub struct BlockFields {
        pub number: bool,
        pub hash: bool,
        pub parent_hash: bool,
        pub timestamp: bool,
        pub miner: bool,
        pub gas_limit: bool,
        pub gas_used: bool,
        pub base_fee_per_gas: bool,
        pub size: bool,
    }

    impl BlockFields {
        pub fn any(&self) -> bool {
            self.number
                || self.hash
                || self.parent_hash
                || self.timestamp
                || self.miner
                || self.gas_limit
                || self.gas_used
                || self.base_fee_per_gas
                || self.size
        }

        pub fn all() -> Self {
            Self {
                number: true,
                hash: true,
                parent_hash: true,
                timestamp: true,
                miner: true,
                gas_limit: true,
                gas_used: true,
                base_fee_per_gas: true,
                size: true,
            }
        }
    }

    #[derive(Debug, Clone, Default, Serialize, Deserialize)]
    #[serde(default)]
    pub struct TransactionFields {
        pub block_number: bool,
        pub transaction_index: bool,
        pub hash: bool,
        pub from: bool,
        pub to: bool,
        pub value: bool,
        pub nonce: bool,
        pub gas_limit: bool,
        pub gas_price: bool,
        pub input: bool,
    }

    impl TransactionFields {
        pub fn any(&self) -> bool {
            self.block_number
                || self.transaction_index
                || self.hash
                || self.from
                || self.to
                || self.value
                || self.nonce
                || self.gas_limit
                || self.gas_price
                || self.input
        }

        pub fn all() -> Self {
            Self {
                block_number: true,
                transaction_index: true,
                hash: true,
                from: true,
                to: true,
                value: true,
                nonce: true,
                gas_limit: true,
                gas_price: true,
                input: true,
            }
        }
    }

    #[derive(Debug, Clone, Default, Serialize, Deserialize)]
    #[serde(default)]
    pub struct LogFields {
        pub block_number: bool,
        pub transaction_hash: bool,
        pub transaction_index: bool,
        pub log_index: bool,
        pub address: bool,
        pub topic0: bool,
        pub topic1: bool,
        pub topic2: bool,
        pub topic3: bool,
        pub data: bool,
    }

    impl LogFields {
        pub fn any(&self) -> bool {
            self.block_number
                || self.transaction_hash
                || self.transaction_index
                || self.log_index
                || self.address
                || self.topic0
                || self.topic1
                || self.topic2
                || self.topic3
                || self.data
        }

        pub fn all() -> Self {
            Self {
                block_number: true,
                transaction_hash: true,
                transaction_index: true,
                log_index: true,
                address: true,
                topic0: true,
                topic1: true,
                topic2: true,
                topic3: true,
                data: true,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::evm;

    #[test]
    fn validate_rejects_inverted_range() {
        let query = evm::Query {
            from_block: 100,
            to_block: Some(50),
            fields: evm::Fields {
                block: evm::BlockFields::all(),
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(query.validate().is_err());
    }

    #[test]
    fn validate_rejects_empty_projection() {
        let query = evm::Query {
            from_block: 0,
            to_block: Some(10),
            ..Default::default()
        };
        assert!(query.validate().is_err());
    }

    #[test]
    fn validate_accepts_unbounded() {
        let query = evm::Query {
            from_block: 0,
            to_block: None,
            fields: evm::Fields {
                log: evm::LogFields::all(),
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(query.validate().is_ok());
    }

    #[test]
    fn default_fields_select_nothing() {
        let fields = evm::Fields::default();
        assert!(!fields.block.any());
        assert!(!fields.transaction.any());
        assert!(!fields.log.any());
    }
}
