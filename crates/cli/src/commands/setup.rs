//! `agentpay setup` — print the identity and check provisioning

use crate::error::CliResult;
use crate::runtime::Runtime;

pub async fn run(runtime: Runtime) -> CliResult<()> {
    println!("identity address: {}", runtime.wallet.address());
    match runtime.wallet.name() {
        Some(name) => println!("registered name:  {name}"),
        None => println!("registered name:  (none; set AGENTPAY_ENS_NAME)"),
    }
    println!("payment method:   {}", runtime.payment_path);
    println!("clearing:         {}", runtime.clearing.endpoint);
    println!("settlement rpc:   {}", runtime.settlement.rpc_url);
    println!("feed:             {}", runtime.feed_url);
    if let Some(endpoint) = &runtime.endpoint {
        println!("self endpoint:    {endpoint}");
    }

    // Record provisioning is one-time external setup; here we only report
    // whether the name already resolves to this identity.
    if let Some(name) = runtime.wallet.name() {
        match runtime.resolver()?.resolve(name).await {
            Ok(record) => {
                println!("name records:     endpoint={}", record.endpoint);
                if !record.capabilities.is_empty() {
                    println!("capabilities:     {}", record.capabilities.join(", "));
                }
                if record.address == runtime.wallet.address() {
                    println!("address record:   matches this identity");
                } else {
                    println!(
                        "address record:   {} (DOES NOT match this identity)",
                        record.address
                    );
                }
            }
            Err(e) => {
                println!("name records:     not resolvable yet ({e})");
            }
        }
    }
    Ok(())
}
