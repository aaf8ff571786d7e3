// Entry point for the ledger CLI. Every command builds its own handles from
// the Config it is given; nothing is process-global.
use clap::Parser;
use ledger_chain::{
    decode_address, validate_address, Block, Blockchain, BlockchainError, Command, Config,
    KeyValueStore, Opt, Result, SledStore, TcpRelay, Transaction, TransactionRelay, UTXOSet,
    Wallets,
};
use log::{error, info, LevelFilter};
use std::process;
use std::sync::Arc;

fn main() {
    let opt = Opt::parse();
    let config = Config::load(opt.config.as_deref());

    // I default to Info; the config file's log_level and then RUST_LOG can
    // override it.
    let mut builder = env_logger::Builder::new();
    builder.filter_level(LevelFilter::Info);
    if let Ok(Some(level)) = config.as_ref().map(|c| c.log_level.as_deref()) {
        builder.parse_filters(level);
    }
    builder.parse_default_env();
    builder.init();

    let result = config.and_then(|config| run_command(opt.command, &config));
    if let Err(e) = result {
        error!("Error: {e}");
        process::exit(1);
    }
}

fn open_store(config: &Config) -> Result<Arc<dyn KeyValueStore>> {
    Ok(Arc::new(SledStore::open(config.blocks_path())?))
}

fn open_blockchain(config: &Config) -> Result<Blockchain> {
    Blockchain::continue_blockchain(open_store(config)?, config.chain_params()?)
}

fn require_address(address: &str) -> Result<()> {
    if !validate_address(address) {
        return Err(BlockchainError::InvalidAddress(address.to_string()));
    }
    Ok(())
}

fn run_command(command: Command, config: &Config) -> Result<()> {
    match command {
        Command::Createblockchain { address } => {
            require_address(&address)?;
            let blockchain = Blockchain::create_blockchain(
                open_store(config)?,
                &address,
                config.chain_params()?,
            )?;
            // The index starts out as just the genesis reward.
            let utxo_set = UTXOSet::new(blockchain);
            utxo_set.reindex()?;
            println!("Done!");
        }
        Command::Createwallet => {
            let mut wallets = Wallets::load(config.wallets_path())?;
            let address = wallets.create_wallet()?;
            println!("Your new address: {address}")
        }
        Command::GetBalance { address } => {
            let pub_key_hash = decode_address(&address)?;
            let utxo_set = UTXOSet::new(open_blockchain(config)?);
            let balance = utxo_set.get_balance(&pub_key_hash)?;
            println!("Balance of {address}: {balance}");
        }
        Command::ListAddresses => {
            let wallets = Wallets::load(config.wallets_path())?;
            for address in wallets.get_addresses() {
                println!("{address}")
            }
        }
        Command::Send {
            from,
            to,
            amount,
            mine,
        } => {
            require_address(&from)?;
            require_address(&to)?;

            let blockchain = open_blockchain(config)?;
            let utxo_set = UTXOSet::new(blockchain.clone());
            let wallets = Wallets::load(config.wallets_path())?;
            let wallet = wallets.require_wallet(&from)?;
            let transaction = Transaction::new_utxo_transaction(wallet, &to, amount, &utxo_set)?;

            if mine {
                // Mining locally: the sender also collects the block reward.
                let coinbase_tx = Transaction::new_coinbase_tx(&from, "")?;
                let block = blockchain.mine_block(&[coinbase_tx, transaction])?;
                utxo_set.update(&block)?;
            } else {
                let relay =
                    TcpRelay::new(config.node_address.clone(), config.known_peers.clone());
                relay.broadcast_transaction(&transaction)?;
                info!(
                    "Relayed transaction {} to {} peers",
                    transaction.get_id_hex(),
                    relay.known_peers().len()
                );
            }
            println!("Success!")
        }
        Command::Printchain => {
            for block in open_blockchain(config)?.iterator()? {
                print_block(&block?);
            }
        }
        Command::Reindexutxo => {
            let utxo_set = UTXOSet::new(open_blockchain(config)?);
            utxo_set.reindex()?;
            let count = utxo_set.count_transactions()?;
            println!("Done! There are {count} transactions in the UTXO set.");
        }
    }
    Ok(())
}

fn print_block(block: &Block) {
    println!("{block}");
}
