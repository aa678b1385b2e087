//! Pool usage: bounds, priorities, validation and graceful shutdown

use async_trait::async_trait;
use kvpool::{Pool, PoolOptions, ResourceFactory};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio::time::sleep;

#[derive(Debug)]
struct Connection {
    id: u32,
}

#[derive(Debug, thiserror::Error)]
#[error("backend unreachable")]
struct ConnectFailed;

struct ConnectionFactory {
    next_id: AtomicU32,
}

#[async_trait]
impl ResourceFactory for ConnectionFactory {
    type Resource = Connection;
    type Error = ConnectFailed;

    async fn create(&self) -> Result<Connection, ConnectFailed> {
        // pretend to dial the backend
        sleep(Duration::from_millis(10)).await;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        Ok(Connection { id })
    }

    async fn destroy(&self, connection: Connection) {
        println!("   closing connection {}", connection.id);
    }
}

#[tokio::main]
async fn main() {
    println!("=== kvpool - Pool Usage ===\n");

    basic_acquire_release().await;
    priority_waiters().await;
    graceful_shutdown().await;
}

fn factory() -> ConnectionFactory {
    ConnectionFactory {
        next_id: AtomicU32::new(1),
    }
}

async fn basic_acquire_release() {
    println!("1. Acquire and release:");

    let pool = Pool::new(factory(), PoolOptions::new().with_bounds(2, 4));

    let conn = pool.acquire().await.unwrap();
    println!("   got connection {}", conn.id);
    pool.release(conn).unwrap();

    {
        let conn = pool.acquire().await.unwrap();
        println!("   got connection {} again", conn.id);
        // dropping the guard returns the connection too
    }

    let status = pool.status();
    println!("   idle={} borrowed={}\n", status.idle, status.borrowed);
}

async fn priority_waiters() {
    println!("2. Priority waiters:");

    let pool = Arc::new(Pool::new(factory(), PoolOptions::new().with_bounds(0, 1)));
    let held = pool.acquire().await.unwrap();

    let background = {
        let pool = Arc::clone(&pool);
        tokio::spawn(async move {
            let conn = pool.acquire().await.unwrap();
            println!("   background task got connection {}", conn.id);
        })
    };
    let urgent = {
        let pool = Arc::clone(&pool);
        tokio::spawn(async move {
            let conn = pool.acquire_priority(10).await.unwrap();
            println!("   urgent task got connection {} first", conn.id);
        })
    };

    sleep(Duration::from_millis(20)).await;
    drop(held);

    urgent.await.unwrap();
    background.await.unwrap();
    println!();
}

async fn graceful_shutdown() {
    println!("3. Graceful shutdown:");

    let pool = Pool::new(factory(), PoolOptions::new().with_bounds(2, 4));
    let conn = pool.acquire().await.unwrap();

    let shutdown = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.end().await })
    };
    sleep(Duration::from_millis(20)).await;

    println!("   releasing the last borrowed connection");
    drop(conn);
    shutdown.await.unwrap().unwrap();
    println!("   pool is shut down");
}
