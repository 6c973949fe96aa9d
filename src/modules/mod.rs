pub mod accounts;
pub mod books;

use catalog_kernel::ModuleRegistry;

/// Register all catalog modules with the registry
pub fn register_all(registry: &mut ModuleRegistry) {
    registry.register(accounts::create_module());
    registry.register(books::create_module());
}
