// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! Processing modes known to the engine.

use agent::{
    Error,
    model::Collaboration,
    pmode::{ReceivingProcessingMode, SendingProcessingMode},
};

use std::collections::HashMap;

#[derive(Debug, Clone, Default)]
pub struct PModeStore {
    sending: HashMap<String, SendingProcessingMode>,
    receiving: Vec<ReceivingProcessingMode>,
}

impl PModeStore {
    /// Fails on duplicate ids.
    pub fn new(
        sending: Vec<SendingProcessingMode>,
        receiving: Vec<ReceivingProcessingMode>,
    ) -> Result<Self, Error> {
        let mut by_id = HashMap::new();
        for pmode in sending {
            if by_id.contains_key(&pmode.id) {
                return Err(Error::Configuration(format!(
                    "Duplicate sending PMode {}",
                    pmode.id
                )));
            }
            by_id.insert(pmode.id.clone(), pmode);
        }
        Ok(Self {
            sending: by_id,
            receiving,
        })
    }

    pub fn sending(&self, id: &str) -> Result<&SendingProcessingMode, Error> {
        self.sending
            .get(id)
            .ok_or_else(|| Error::Configuration(format!("Unknown sending PMode {}", id)))
    }

    /// First receiving PMode accepting `collaboration`.
    pub fn receiving_for(
        &self,
        collaboration: &Collaboration,
    ) -> Option<&ReceivingProcessingMode> {
        self.receiving
            .iter()
            .find(|pmode| pmode.matches(collaboration))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup() {
        let sending = SendingProcessingMode {
            id: "send".to_owned(),
            ..Default::default()
        };
        let store = PModeStore::new(vec![sending.clone()], vec![]).unwrap();
        assert!(store.sending("send").is_ok());
        assert!(matches!(store.sending("other"), Err(Error::Configuration(_))));
        assert!(store.receiving_for(&Collaboration::default()).is_none());
        assert!(PModeStore::new(vec![sending.clone(), sending], vec![]).is_err());
    }
}
