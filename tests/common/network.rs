use std::{
    collections::BTreeMap,
    sync::{
        mpsc::{self, Receiver, Sender},
        Arc, Mutex,
    },
};

use ed25519_dalek::VerifyingKey;
use shamap_consensus::{
    networking::{Message, Network},
    types::{data_types::VerifyingKeyBytes, validator_set::ValidatorSet},
};

type Envelope = (VerifyingKey, Message);

/// One replica's connection to an in-process network in which every replica can reach every other one,
/// validator or not. Messages travel over channels, so they arrive in the order they were sent.
#[derive(Clone)]
pub(crate) struct NetworkStub {
    me: VerifyingKey,
    outboxes: BTreeMap<VerifyingKeyBytes, Sender<Envelope>>,
    inbox: Arc<Mutex<Receiver<Envelope>>>,
}

impl NetworkStub {
    fn deliver(&self, to: &VerifyingKeyBytes, message: Message) {
        if let Some(outbox) = self.outboxes.get(to) {
            // A replica that has shut down simply stops receiving.
            let _ = outbox.send((self.me, message));
        }
    }
}

impl Network for NetworkStub {
    fn init_validator_set(&mut self, _: ValidatorSet) {}

    fn send(&mut self, peer: VerifyingKey, message: Message) {
        self.deliver(&peer.to_bytes(), message);
    }

    fn broadcast(&mut self, message: Message) {
        let me = self.me.to_bytes();
        for peer in self.outboxes.keys().filter(|peer| **peer != me) {
            self.deliver(peer, message.clone());
        }
    }

    fn recv(&mut self) -> Option<Envelope> {
        self.inbox.lock().unwrap().try_recv().ok()
    }
}

/// Connect every one of `peers` to all the others. The stubs are returned in the order of `peers`.
pub(crate) fn mock_network(peers: impl Iterator<Item = VerifyingKey>) -> Vec<NetworkStub> {
    let mut outboxes = BTreeMap::new();
    let mut inboxes = Vec::new();
    for peer in peers {
        let (outbox, inbox) = mpsc::channel();
        outboxes.insert(peer.to_bytes(), outbox);
        inboxes.push((peer, inbox));
    }

    inboxes
        .into_iter()
        .map(|(me, inbox)| NetworkStub {
            me,
            outboxes: outboxes.clone(),
            inbox: Arc::new(Mutex::new(inbox)),
        })
        .collect()
}
