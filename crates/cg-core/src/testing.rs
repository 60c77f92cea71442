//! Test harness: an engine over the arena DOM with a manual clock and
//! in-memory storage and delivery.

use std::cell::RefCell;
use std::rc::Rc;

use crate::artifact::MemoryDelivery;
use crate::clock::{Clock, ManualClock};
use crate::config::Config;
use crate::dom::{Dom, MemDom, MemNode};
use crate::engine::Engine;
use crate::store::MemoryStorage;
use crate::types::{ActionOutcome, Effect};

pub const VIDEO: &str = "https://chzzk.naver.com/video/123";

pub struct Harness {
    pub engine: Engine<MemDom>,
    pub clock: ManualClock,
    pub storage: Rc<RefCell<MemoryStorage>>,
    pub delivery: Rc<RefCell<MemoryDelivery>>,
    pub list: MemNode,
}

impl Harness {
    pub fn new(url: &str) -> Self {
        let mut dom = MemDom::new();
        dom.set_location(url);
        let root = dom.root();
        let list = dom.element("div", &["comment_list"]);
        dom.append(root, list);

        let clock = ManualClock::new(1_700_000_000_000);
        let storage = Rc::new(RefCell::new(MemoryStorage::default()));
        let delivery = Rc::new(RefCell::new(MemoryDelivery::default()));
        let engine = Engine::new(
            dom,
            Box::new(storage.clone()),
            Config::default(),
            Box::new(clock.clone()),
            Box::new(delivery.clone()),
        );
        Self {
            engine,
            clock,
            storage,
            delivery,
            list,
        }
    }

    pub fn loaded(url: &str) -> Self {
        let mut harness = Self::new(url);
        harness.engine.load_store().unwrap();
        harness
    }

    /// Render a comment and index its author as the tap would.
    pub fn comment(&mut self, key: &str, author: &str, nickname: &str, text: &str) -> MemNode {
        let list = self.list;
        let node = self.engine.dom_mut().comment(list, key, nickname, text);
        self.engine.identity.insert(key, author);
        node
    }

    /// Advance past every pending deadline.
    pub fn settle(&mut self) {
        while let Some(deadline) = self.engine.next_deadline() {
            self.clock.set(deadline.max(self.clock.now_ms()));
            self.engine.run_due();
        }
    }

    pub fn button(&self, container: MemNode, class: &str) -> MemNode {
        self.engine.dom().find_class(&container, class).unwrap()
    }

    pub fn click(&mut self, node: MemNode) -> ActionOutcome<MemNode> {
        let action = self.engine.dom().click(node).unwrap();
        self.engine.handle_action(&node, action)
    }

    pub fn toasts(&mut self) -> Vec<String> {
        self.engine
            .drain_effects()
            .into_iter()
            .filter_map(|effect| match effect {
                Effect::Toast { message, .. } => Some(message),
                _ => None,
            })
            .collect()
    }
}
