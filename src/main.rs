//! Command-line entry point for the ozycoin node.

use std::sync::Arc;

use anyhow::bail;
use clap::{Parser, Subcommand};

use ozycoin::blockchain::{Blockchain, Transaction};
use ozycoin::config::NodeConfig;
use ozycoin::consensus::pow::ProofOfWork;
use ozycoin::database::UtxoSet;
use ozycoin::network::{self, Node};
use ozycoin::wallet::{self, Wallets};

#[derive(Parser)]
#[command(name = "ozycoin", version, about = "A minimal proof-of-work cryptocurrency node")]
struct Cli {
    /// Node id; selects the listen port and the per-node file names.
    #[arg(long, env = "NODE_ID", default_value = "3000")]
    node_id: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create a new wallet and print its address
    Createwallet,
    /// Create a new chain, paying the genesis reward to ADDRESS
    Create {
        #[arg(short, long)]
        address: String,
    },
    /// List the addresses in this node's wallet file
    List,
    /// Print the balance of ADDRESS
    Balance {
        #[arg(short, long)]
        address: String,
    },
    /// Send AMOUNT from FROM to TO
    Send {
        #[arg(short, long)]
        from: String,
        #[arg(short, long)]
        to: String,
        #[arg(short, long)]
        amount: u64,
        /// Mine the block locally instead of relaying to the central node
        #[arg(short, long)]
        mine: bool,
    },
    /// Print every block from the tip back to genesis
    Print,
    /// Start the node server
    Start {
        /// Mine to MINER whenever enough transactions are pending
        #[arg(short, long)]
        miner: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    let cfg = NodeConfig::new(cli.node_id);

    match cli.command {
        Command::Createwallet => {
            let mut wallets = Wallets::open(cfg.wallet_path())?;
            let address = wallets.create_wallet()?;
            println!("new address: {}", address);
        }

        Command::Create { address } => {
            require_address(&address)?;
            let chain = Arc::new(Blockchain::create(&cfg, &address)?);
            let utxo = UtxoSet::new(chain)?;
            utxo.reindex()?;
            println!("created chain, genesis reward paid to {}", address);
        }

        Command::List => {
            let wallets = Wallets::open(cfg.wallet_path())?;
            for address in wallets.addresses() {
                println!("{}", address);
            }
        }

        Command::Balance { address } => {
            require_address(&address)?;
            let chain = Arc::new(Blockchain::open(&cfg)?);
            let utxo = UtxoSet::new(chain)?;
            let pub_key_hash = wallet::pub_key_hash_from_address(&address)?;
            let balance: u64 = utxo
                .find_utxo(&pub_key_hash)?
                .iter()
                .map(|out| out.value)
                .sum();
            println!("balance of {}: {}", address, balance);
        }

        Command::Send {
            from,
            to,
            amount,
            mine,
        } => {
            require_address(&from)?;
            require_address(&to)?;

            let wallets = Wallets::open(cfg.wallet_path())?;
            let sender = wallets.get_wallet(&from)?;
            let chain = Arc::new(Blockchain::open(&cfg)?);
            let utxo = UtxoSet::new(chain.clone())?;

            let tx = Transaction::new_utxo(sender, &to, amount, &utxo)?;
            if mine {
                let block = chain.mine_block(vec![tx])?;
                utxo.update(&block)?;
                println!("mined block {}", block.hash);
            } else {
                network::send_transaction(&cfg.central_node, &cfg.listen_addr(), &tx).await?;
                println!("transaction {} sent to {}", tx.id, cfg.central_node);
            }
        }

        Command::Print => {
            let chain = Blockchain::open(&cfg)?;
            for block in chain.iter() {
                let block = block?;
                println!("============ block {} ============", block.hash);
                println!("height:    {}", block.height);
                println!("prev:      {}", block.prev_block_hash);
                println!("timestamp: {}", block.timestamp);
                println!("nonce:     {}", block.nonce);
                println!(
                    "pow:       {}",
                    ProofOfWork::new(&block, chain.target_bits())?.verify()
                );
                for tx in &block.transactions {
                    println!("  tx {} ({} in, {} out)", tx.id, tx.vin.len(), tx.vout.len());
                }
                println!();
            }
        }

        Command::Start { miner } => {
            if let Some(ref miner) = miner {
                require_address(miner)?;
            }
            let node = Node::new(&cfg, miner)?;
            node.utxo().reindex()?;
            let handle = node.start().await?;
            handle.await?;
        }
    }

    Ok(())
}

fn require_address(address: &str) -> anyhow::Result<()> {
    if !wallet::validate_address(address) {
        bail!("invalid address: {}", address);
    }
    Ok(())
}
