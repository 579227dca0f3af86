//! AUDT token and bridge contract ABI definitions
//!
//! Uses alloy's sol! macro to generate type-safe bindings. Only the surface the
//! relay consumes is declared.

use alloy::sol;

sol! {
    /// AUDT ERC20 token (mintable by the relayer account)
    #[sol(rpc)]
    contract AuditToken {
        /// Mint new tokens to a recipient (owner/minter only)
        function mint(address recipient, uint256 amount) external;

        function balanceOf(address account) external view returns (uint256);

        event Transfer(address indexed from, address indexed to, uint256 value);
    }

    /// Lock-side bridge contract
    #[sol(rpc)]
    contract Bridge {
        /// Mint the tokens recorded for `identifier` on the counterpart chain.
        /// Reverts if the identifier has already been used.
        function createNewTokens(bytes32 identifier) external;

        /// Emitted when a user locks tokens for bridging
        event AmountReceived(address user, uint256 amount, bytes32 identifier);
    }
}
