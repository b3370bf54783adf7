use alloy::sol;

sol! {
    #[allow(missing_docs)]
    #[derive(Debug)]
    #[sol(rpc)]
    interface IERC20 {
        function balanceOf(address account) external view returns (uint256);
        function allowance(address owner, address spender) external view returns (uint256);
        function decimals() external view returns (uint8);
    }
}

sol! {
    #[allow(missing_docs)]
    #[derive(Debug)]
    #[sol(rpc)]
    interface ITestToken {
        function timeUntilNextFaucet(address user) external view returns (uint256);
    }
}

sol! {
    #[allow(missing_docs)]
    #[derive(Debug)]
    #[sol(rpc)]
    interface IPaymentGateway {
        event PaymentProcessed(
            address indexed user,
            string indexed orderId,
            string productId,
            uint256 amount,
            uint256 timestamp
        );

        function processPayment(string memory productId, string memory orderId) external;
        function getPayment(string memory orderId)
            external
            view
            returns (address user, string memory productId, uint256 amount, uint256 timestamp);
        function isOrderProcessed(string memory orderId) external view returns (bool);
        function getUserPayments(address user, uint256 limit) external view returns (string[] memory);
        function getAllProducts() external view returns (string[] memory);
        function getProduct(string memory productId)
            external
            view
            returns (string memory id, uint256 price, bool active, string memory description);
    }
}
