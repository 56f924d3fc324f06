//! The smallest useful mapping: copy members with matching names.
use std::sync::Arc;

use member_mapper::*;

#[derive(Clone, Debug, Default, Shape)]
struct User {
    id: u64,
    name: String,
    password_hash: String,
}

#[derive(Clone, Debug, Default, Shape)]
struct UserView {
    id: u64,
    name: String,
}

fn main() -> Result<()> {
    let registry = Arc::new(RuleRegistry::new());
    registry.register::<User, UserView>()?;

    let mapper = Mapper::new(registry);
    let user = User {
        id: 1,
        name: "ada".into(),
        password_hash: "not for display".into(),
    };
    let view: UserView = mapper.map(&user)?;
    println!("{:?}", view);
    Ok(())
}
