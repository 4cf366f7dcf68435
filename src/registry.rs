use crate::{
	config::BinderConfig,
	constant_pool::ConstantPool,
	debounce::Debouncers,
	dom::{DomHost, DomId},
	expression::{ExpressionEvaluator, SimpleEvaluator},
	server_event::{MethodTable, ServerEventObject},
	tree::NodeId,
};
use core::cell::RefCell;
use hashbrown::HashMap;
use std::rc::{Rc, Weak};
use tracing::trace;

struct RegistryInner {
	host: Rc<dyn DomHost>,
	constant_pool: Rc<ConstantPool>,
	evaluator: Rc<dyn ExpressionEvaluator>,
	config: BinderConfig,
	debouncers: Debouncers,
	server_objects: RefCell<HashMap<(DomId, MethodTable), ServerEventObject>>,
	existing_elements: RefCell<HashMap<(NodeId, String), NodeId>>,
}

/// The services shared by all bindings of one page.
#[derive(Clone)]
pub struct Registry(Rc<RegistryInner>);
impl Registry {
	/// A registry with an empty constant pool, the [`SimpleEvaluator`] and the default [`BinderConfig`].
	pub fn new(host: Rc<dyn DomHost>) -> Self {
		Self::builder(host).build()
	}

	pub fn builder(host: Rc<dyn DomHost>) -> RegistryBuilder {
		RegistryBuilder {
			host,
			constant_pool: None,
			evaluator: None,
			config: BinderConfig::default(),
		}
	}

	#[must_use]
	pub fn host(&self) -> &Rc<dyn DomHost> {
		&self.0.host
	}

	#[must_use]
	pub fn constant_pool(&self) -> &Rc<ConstantPool> {
		&self.0.constant_pool
	}

	#[must_use]
	pub fn evaluator(&self) -> &Rc<dyn ExpressionEvaluator> {
		&self.0.evaluator
	}

	#[must_use]
	pub fn config(&self) -> &BinderConfig {
		&self.0.config
	}

	#[must_use]
	pub fn debouncers(&self) -> &Debouncers {
		&self.0.debouncers
	}

	#[must_use]
	pub fn server_object(&self, element: DomId, table: MethodTable) -> Option<ServerEventObject> {
		self.0.server_objects.borrow().get(&(element, table)).cloned()
	}

	pub(crate) fn insert_server_object(&self, element: DomId, table: MethodTable, object: ServerEventObject) {
		self.0.server_objects.borrow_mut().insert((element, table), object);
	}

	/// Forgets the method tables of `element`. Calls still pending on them can no longer complete.
	pub(crate) fn release_server_objects(&self, element: DomId) {
		self.0.server_objects.borrow_mut().retain(|(key, _), _| *key != element);
	}

	/// Claims the virtual child address `address` under `parent` for `claimant`.
	///
	/// # Errors
	///
	/// Returns the id of the existing claimant iff another node already claimed it.
	pub(crate) fn claim_existing_element(&self, parent: NodeId, address: &str, claimant: NodeId) -> Result<(), NodeId> {
		let mut claims = self.0.existing_elements.borrow_mut();
		match claims.get(&(parent, address.to_owned())) {
			Some(existing) if *existing != claimant => Err(*existing),
			_ => {
				claims.insert((parent, address.to_owned()), claimant);
				trace!(parent, address, claimant, "Claimed virtual child address.");
				Ok(())
			}
		}
	}

	pub(crate) fn release_existing_element(&self, parent: NodeId, address: &str, claimant: NodeId) {
		let mut claims = self.0.existing_elements.borrow_mut();
		let key = (parent, address.to_owned());
		if claims.get(&key) == Some(&claimant) {
			claims.remove(&key);
		}
	}

	/// Number of virtual child requests still waiting for their target.
	#[must_use]
	pub fn pending_claim_count(&self) -> usize {
		self.0.existing_elements.borrow().len()
	}

	pub(crate) fn downgrade(&self) -> WeakRegistry {
		WeakRegistry(Rc::downgrade(&self.0))
	}
}
impl core::fmt::Debug for Registry {
	fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
		f.debug_struct("Registry")
			.field("config", &self.0.config)
			.field("debouncers", &self.0.debouncers)
			.field("server_objects", &self.0.server_objects.borrow().len())
			.field("existing_elements", &self.0.existing_elements.borrow().len())
			.finish()
	}
}

#[derive(Clone)]
pub(crate) struct WeakRegistry(Weak<RegistryInner>);
impl WeakRegistry {
	pub fn upgrade(&self) -> Option<Registry> {
		self.0.upgrade().map(Registry)
	}
}

/// Configures a [`Registry`].
#[must_use]
pub struct RegistryBuilder {
	host: Rc<dyn DomHost>,
	constant_pool: Option<Rc<ConstantPool>>,
	evaluator: Option<Rc<dyn ExpressionEvaluator>>,
	config: BinderConfig,
}
impl RegistryBuilder {
	pub fn constant_pool(mut self, constant_pool: Rc<ConstantPool>) -> Self {
		self.constant_pool = Some(constant_pool);
		self
	}

	pub fn evaluator(mut self, evaluator: Rc<dyn ExpressionEvaluator>) -> Self {
		self.evaluator = Some(evaluator);
		self
	}

	pub fn config(mut self, config: BinderConfig) -> Self {
		self.config = config;
		self
	}

	pub fn build(self) -> Registry {
		Registry(Rc::new(RegistryInner {
			host: self.host,
			constant_pool: self.constant_pool.unwrap_or_default(),
			evaluator: self.evaluator.unwrap_or_else(|| Rc::new(SimpleEvaluator::new())),
			config: self.config,
			debouncers: Debouncers::new(),
			server_objects: RefCell::default(),
			existing_elements: RefCell::default(),
		}))
	}
}
